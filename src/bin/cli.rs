#![cfg(not(tarpaulin_include))]

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use seguiment::app::templates;
use seguiment::catalog::{Catalog, LogEntry, MAX_FIELDS};
use seguiment::config::{Config, DEFAULT_CONFIG_PATH, SheetsBackend};
use seguiment::downloader::{to_csv, to_xlsx};
use seguiment::loader::from_csv;
use seguiment::report::Report;
use seguiment::spreadsheet::{Row, Spreadsheet};
use seguiment::store::{FileStore, ReadCache, SheetStore, open_store};

#[derive(Parser, Debug)]
#[command(name = "seguiment-cli", version, about = "Manage the sheets behind the progress form")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "SEGUIMENT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List teams and their PINs
    Teams,
    /// List projects, optionally only those a team can see
    Projects {
        #[arg(long)]
        team: Option<String>,
    },
    /// Show which team a PIN logs in as
    CheckPin { pin: String },
    /// Load every `<Sheet>.csv` of a directory into the store
    Import { dir: PathBuf },
    /// Write a sheet as CSV (stdout by default) or XLSX
    Export {
        sheet: String,
        #[arg(long)]
        xlsx: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the report email for a project without sending it
    Preview {
        project: String,
        work_type: String,
        /// Measurements, comma separated
        #[arg(long, value_delimiter = ',')]
        values: Vec<f64>,
        #[arg(long, default_value = "")]
        comments: String,
        #[arg(long, default_value_t = 0)]
        photos: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let store = open_store(&config.sheets)?;
    let cache = ReadCache::new(Duration::ZERO);

    match cli.command {
        Command::Teams => {
            let catalog = Catalog::load(store.as_ref(), &cache).await?;
            for team in &catalog.teams {
                println!("{}\t{}", team.name, team.pin);
            }
        }
        Command::Projects { team } => {
            let catalog = Catalog::load(store.as_ref(), &cache).await?;
            let projects = match &team {
                Some(team) => catalog.projects_for_team(team),
                None => catalog.projects.iter().collect(),
            };
            for project in projects {
                println!(
                    "{}\t{}\t{}",
                    project.name,
                    project.team.as_deref().unwrap_or("-"),
                    project.recipients().join(", ")
                );
            }
        }
        Command::CheckPin { pin } => {
            let catalog = Catalog::load(store.as_ref(), &cache).await?;
            match catalog.find_team(&pin) {
                Some(team) => println!("{}", team.name),
                None => bail!("PIN incorrecto"),
            }
        }
        Command::Import { dir } => import(&config, store.as_ref(), dir).await?,
        Command::Export { sheet, xlsx, out } => {
            let sheet = store.read(&sheet).await?;
            if xlsx {
                let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.xlsx", sheet.name)));
                let bytes = to_xlsx(&sheet).map_err(|e| anyhow::anyhow!(e.to_string()))?;
                std::fs::write(&path, bytes)
                    .with_context(|| format!("could not write {}", path.display()))?;
                println!("Wrote {}", path.display());
            } else {
                let csv = to_csv(&sheet);
                match out {
                    Some(path) => std::fs::write(&path, csv)
                        .with_context(|| format!("could not write {}", path.display()))?,
                    None => io::stdout().write_all(csv.as_bytes())?,
                }
            }
        }
        Command::Preview {
            project,
            work_type,
            values,
            comments,
            photos,
        } => {
            let catalog = Catalog::load(store.as_ref(), &cache).await?;
            let project = catalog
                .project(&project)
                .with_context(|| format!("unknown project '{}'", project))?;
            let template = catalog
                .template(&work_type)
                .with_context(|| format!("unknown work type '{}'", work_type))?;

            let mut measured = [0.0; MAX_FIELDS];
            for (slot, value) in measured.iter_mut().zip(values) {
                *slot = value;
            }
            let entry = LogEntry {
                timestamp: Local::now(),
                team: project.team.clone().unwrap_or_default(),
                project: project.name.clone(),
                work_type: template.kind.clone(),
                values: measured,
                comments,
                photos,
                manager_signed: false,
                client_signed: false,
            };
            let report = Report::from_entry(
                &entry,
                &template.active_fields(),
                Some(project.logo_url.clone()),
            );

            eprintln!("To: {}", project.recipients().join(", "));
            eprintln!("Subject: {}", report.subject());
            println!("{}", report.render_html(&templates()?)?);
        }
    }

    Ok(())
}

async fn import(config: &Config, store: &dyn SheetStore, dir: PathBuf) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("could not read {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("csv"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no CSV files in {}", dir.display());
    }

    for path in paths {
        let sheet = from_csv(&path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        let count = sheet.len();
        let name = sheet.name.clone();
        if config.sheets.backend == SheetsBackend::File {
            // Whole-sheet replace, so importing twice does not duplicate rows
            FileStore::new(&config.sheets.path).put_sheet(sheet)?;
        } else {
            for row in rows_of(&sheet) {
                store.append(&name, row).await?;
            }
        }
        println!("{}: {} row(s)", name, count);
    }
    Ok(())
}

fn rows_of(sheet: &Spreadsheet) -> Vec<Row> {
    sheet
        .rows
        .iter()
        .map(|cells| {
            sheet
                .headers
                .iter()
                .zip(cells)
                .fold(Row::new(), |row, (header, value)| row.with(header, value.clone()))
        })
        .collect()
}
