//! Typed views over the configuration worksheets and the log row written on
//! every submission.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::spreadsheet::{Row, Spreadsheet};
use crate::store::{ReadCache, SheetStore, StoreError};

pub const PROJECTS_SHEET: &str = "Projectes";
pub const TEMPLATES_SHEET: &str = "Config_Templates";
pub const TEAMS_SHEET: &str = "Equips";
pub const LOG_SHEET: &str = "Seguiment";

/// Columns of the log sheet, in the order they are written.
pub const LOG_COLUMNS: [&str; 11] = [
    "Fecha",
    "Hora",
    "Equipo",
    "Proyecto",
    "Trabajo",
    "Dato1",
    "Dato2",
    "Dato3",
    "Comentarios",
    "Fotos",
    "Firmas",
];

/// Templates carry at most this many measurement fields (`Camp1`..`Camp3`).
pub const MAX_FIELDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub name: String,
    /// Team the project is assigned to; `None` means every team sees it.
    pub team: Option<String>,
    pub contact_emails: String,
    pub logo_url: String,
}

impl Project {
    pub fn recipients(&self) -> Vec<String> {
        parse_recipients(&self.contact_emails)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkTypeTemplate {
    pub kind: String,
    pub fields: [String; MAX_FIELDS],
}

impl WorkTypeTemplate {
    /// Non-blank field labels, in column order.
    pub fn active_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub name: String,
    pub pin: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub projects: Vec<Project>,
    pub templates: Vec<WorkTypeTemplate>,
    pub teams: Vec<Team>,
    /// Whether the project sheet has an `Equip` column at all.
    pub projects_assigned: bool,
}

impl Catalog {
    pub async fn load(store: &dyn SheetStore, cache: &ReadCache) -> Result<Self, StoreError> {
        let projects = cache.read(store, PROJECTS_SHEET).await?;
        let templates = cache.read(store, TEMPLATES_SHEET).await?;
        let teams = cache.read(store, TEAMS_SHEET).await?;
        Ok(Self::from_sheets(projects, templates, teams))
    }

    pub fn from_sheets(projects: Spreadsheet, templates: Spreadsheet, teams: Spreadsheet) -> Self {
        let projects_assigned = projects.has_column("Equip");
        Catalog {
            projects: read_projects(projects),
            templates: read_templates(templates),
            teams: read_teams(teams),
            projects_assigned,
        }
    }

    /// Projects visible to `team`: unassigned ones plus those assigned to it.
    pub fn projects_for_team(&self, team: &str) -> Vec<&Project> {
        if !self.projects_assigned {
            return self.projects.iter().collect();
        }
        let team = team.trim();
        self.projects
            .iter()
            .filter(|p| match &p.team {
                None => true,
                Some(assigned) => assigned == team,
            })
            .collect()
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn template(&self, kind: &str) -> Option<&WorkTypeTemplate> {
        self.templates.iter().find(|t| t.kind == kind)
    }

    pub fn work_types(&self) -> Vec<&str> {
        unique(self.templates.iter().map(|t| t.kind.as_str()))
    }

    pub fn find_team(&self, pin: &str) -> Option<&Team> {
        find_team(&self.teams, pin)
    }
}

/// Distinct project names in first-seen order.
pub fn project_names<'a>(projects: &[&'a Project]) -> Vec<&'a str> {
    unique(projects.iter().map(|p| p.name.as_str()))
}

fn unique<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen: Vec<&str> = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

pub fn read_projects(sheet: Spreadsheet) -> Vec<Project> {
    sheet
        .drop_blank("Nom")
        .records()
        .map(|r| {
            let team = r.text("Equip");
            Project {
                name: r.text("Nom"),
                team: if team.is_empty() { None } else { Some(team) },
                contact_emails: r.text("Emails_Contacte"),
                logo_url: r.text("Logo_client"),
            }
        })
        .collect()
}

pub fn read_templates(sheet: Spreadsheet) -> Vec<WorkTypeTemplate> {
    sheet
        .drop_blank("Tipus")
        .records()
        .map(|r| WorkTypeTemplate {
            kind: r.text("Tipus"),
            fields: [r.text("Camp1"), r.text("Camp2"), r.text("Camp3")],
        })
        .collect()
}

pub fn read_teams(sheet: Spreadsheet) -> Vec<Team> {
    sheet
        .drop_blank("Equip")
        .records()
        .map(|r| Team {
            name: r.text("Equip"),
            pin: r.get("PIN").as_text(),
        })
        .collect()
}

/// Spreadsheets store `1234` as `1234.0` and `0042` as `42`; compare PINs on
/// the part before the dot, without leading zeros.
pub fn normalize_pin(value: &str) -> String {
    let whole = value.trim().split('.').next().unwrap_or_default();
    if !whole.is_empty() && whole.bytes().all(|b| b.is_ascii_digit()) {
        let digits = whole.trim_start_matches('0');
        return if digits.is_empty() { "0" } else { digits }.to_string();
    }
    whole.to_string()
}

/// First team whose PIN matches. Blank PINs never match.
pub fn find_team<'a>(teams: &'a [Team], pin: &str) -> Option<&'a Team> {
    let wanted = normalize_pin(pin);
    if wanted.is_empty() {
        return None;
    }
    teams.iter().find(|t| normalize_pin(&t.pin) == wanted)
}

/// Split a comma-separated contact list, dropping blanks.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_string())
        .collect()
}

/// One submission, as written to the log sheet.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub team: String,
    pub project: String,
    pub work_type: String,
    /// Measurements for the active fields, padded to three with zeros.
    pub values: [f64; MAX_FIELDS],
    pub comments: String,
    pub photos: usize,
    pub manager_signed: bool,
    pub client_signed: bool,
}

impl LogEntry {
    pub fn signatures_label(&self) -> String {
        let mut label = String::new();
        if self.manager_signed {
            label.push_str("Resp");
        }
        if self.client_signed {
            label.push_str(" · Cliente");
        }
        label
    }

    pub fn to_row(&self) -> Row {
        let [v1, v2, v3] = self.values;
        Row::new()
            .with("Fecha", self.timestamp.format("%d/%m/%Y").to_string())
            .with("Hora", self.timestamp.format("%H:%M").to_string())
            .with("Equipo", self.team.as_str())
            .with("Proyecto", self.project.as_str())
            .with("Trabajo", self.work_type.as_str())
            .with("Dato1", v1)
            .with("Dato2", v2)
            .with("Dato3", v3)
            .with("Comentarios", self.comments.as_str())
            .with("Fotos", self.photos)
            .with("Firmas", self.signatures_label())
    }
}
