//! The daily report: what the crew did, formatted for email and for the
//! confirmation shown after submitting.

use chrono::{DateTime, Local};
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use crate::catalog::LogEntry;

pub const REPORT_TEMPLATE: &str = "report";

/// Register the email template on a Handlebars registry.
pub fn register(hb: &mut Handlebars<'_>) -> Result<(), TemplateError> {
    hb.register_template_string(REPORT_TEMPLATE, include_str!("./templates/report.hbs"))
}

/// Measurements read better without a trailing `.0`; anything else keeps one decimal.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub timestamp: DateTime<Local>,
    pub team: String,
    pub project: String,
    pub work_type: String,
    /// Active field label with the value entered for it
    pub measurements: Vec<(String, f64)>,
    pub comments: String,
    pub photos: usize,
    pub manager_signed: bool,
    pub client_signed: bool,
    /// Embedded `data:` URL when the logo could be downloaded, the original URL otherwise
    pub logo_src: Option<String>,
}

#[derive(Serialize)]
struct MeasurementView<'a> {
    value: String,
    label: &'a str,
}

#[derive(Serialize)]
struct ReportView<'a> {
    logo_src: Option<&'a str>,
    date: String,
    project: &'a str,
    work_type: &'a str,
    measurements: Vec<MeasurementView<'a>>,
    comments: Option<&'a str>,
    attachments: Option<String>,
    team: &'a str,
}

impl Report {
    pub fn from_entry(entry: &LogEntry, active_fields: &[String], logo_src: Option<String>) -> Self {
        let measurements = active_fields
            .iter()
            .zip(entry.values.iter())
            .map(|(label, value)| (label.clone(), *value))
            .collect();

        Report {
            timestamp: entry.timestamp,
            team: entry.team.clone(),
            project: entry.project.clone(),
            work_type: entry.work_type.clone(),
            measurements,
            comments: entry.comments.clone(),
            photos: entry.photos,
            manager_signed: entry.manager_signed,
            client_signed: entry.client_signed,
            logo_src: logo_src.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn subject(&self) -> String {
        format!("Seguimiento del proyecto {} - Estellé parquet", self.project)
    }

    /// Human summary of what is attached to the email.
    pub fn attachments_summary(&self) -> Vec<String> {
        let mut info = Vec::new();
        if self.photos > 0 {
            info.push(format!("{} foto(s)", self.photos));
        }
        if self.manager_signed {
            info.push("firma responsable".to_string());
        }
        if self.client_signed {
            info.push("firma cliente".to_string());
        }
        info
    }

    pub fn signatures_text(&self) -> String {
        let mut signed = Vec::new();
        if self.manager_signed {
            signed.push("responsable");
        }
        if self.client_signed {
            signed.push("cliente");
        }
        if signed.is_empty() {
            "sin firmas".to_string()
        } else {
            signed.join(" y ")
        }
    }

    /// First line of the confirmation box.
    pub fn success_title(&self) -> String {
        format!("{} · {}", self.project, self.work_type)
    }

    /// Second line of the confirmation box.
    pub fn success_detail(&self) -> String {
        format!(
            "{} · {} foto(s) · {}",
            self.timestamp.format("%d/%m/%Y · %H:%M"),
            self.photos,
            self.signatures_text()
        )
    }

    pub fn render_html(&self, hb: &Handlebars<'_>) -> Result<String, RenderError> {
        let attachments = self.attachments_summary();
        let comments = self.comments.trim();
        let view = ReportView {
            logo_src: self.logo_src.as_deref(),
            date: self.timestamp.format("%d · %m · %Y").to_string(),
            project: &self.project,
            work_type: &self.work_type,
            measurements: self
                .measurements
                .iter()
                .map(|(label, value)| MeasurementView {
                    value: format_value(*value),
                    label: label.as_str(),
                })
                .collect(),
            comments: if comments.is_empty() {
                None
            } else {
                Some(self.comments.as_str())
            },
            attachments: if attachments.is_empty() {
                None
            } else {
                Some(attachments.join(", "))
            },
            team: &self.team,
        };
        hb.render(REPORT_TEMPLATE, &view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> LogEntry {
        LogEntry {
            timestamp: Local.with_ymd_and_hms(2025, 3, 7, 17, 40, 0).unwrap(),
            team: "Equip A".to_string(),
            project: "Casa <Puig>".to_string(),
            work_type: "Instalación".to_string(),
            values: [12.5, 3.0, 0.0],
            comments: "Falta rodapié & silicona".to_string(),
            photos: 2,
            manager_signed: true,
            client_signed: false,
        }
    }

    fn registry() -> Handlebars<'static> {
        let mut hb = Handlebars::new();
        register(&mut hb).unwrap();
        hb
    }

    fn fields() -> Vec<String> {
        vec!["m2 colocados".to_string(), "ml rodapié".to_string()]
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(12.0), "12");
        assert_eq!(format_value(12.5), "12.5");
        assert_eq!(format_value(3.14159), "3.1");
    }

    #[test]
    fn test_measurements_follow_active_fields() {
        let report = Report::from_entry(&entry(), &fields(), None);
        assert_eq!(
            report.measurements,
            vec![
                ("m2 colocados".to_string(), 12.5),
                ("ml rodapié".to_string(), 3.0)
            ]
        );
    }

    #[test]
    fn test_subject_and_summaries() {
        let report = Report::from_entry(&entry(), &fields(), None);
        assert_eq!(report.subject(), "Seguimiento del proyecto Casa <Puig> - Estellé parquet");
        assert_eq!(report.attachments_summary(), vec!["2 foto(s)", "firma responsable"]);
        assert_eq!(report.success_title(), "Casa <Puig> · Instalación");
        assert_eq!(report.success_detail(), "07/03/2025 · 17:40 · 2 foto(s) · responsable");

        let mut both = report.clone();
        both.client_signed = true;
        assert_eq!(both.signatures_text(), "responsable y cliente");
        both.manager_signed = false;
        both.client_signed = false;
        assert_eq!(both.signatures_text(), "sin firmas");
    }

    #[test]
    fn test_html_contains_escaped_values() {
        let report = Report::from_entry(&entry(), &fields(), Some("https://cdn/logo.png".to_string()));
        let html = report.render_html(&registry()).unwrap();

        assert!(html.contains("07 · 03 · 2025"));
        assert!(html.contains("Casa &lt;Puig&gt;"));
        assert!(!html.contains("Casa <Puig>"));
        assert!(html.contains("12.5"));
        assert!(html.contains("m2 colocados"));
        assert!(html.contains("ml rodapié"));
        assert!(html.contains("Falta rodapié &amp; silicona"));
        assert!(html.contains("2 foto(s), firma responsable"));
        assert!(html.contains("Equip A"));
        assert!(html.contains("<img src=\"https://cdn/logo.png\""));
    }

    #[test]
    fn test_html_omits_empty_sections() {
        let mut plain = entry();
        plain.comments = "   ".to_string();
        plain.photos = 0;
        plain.manager_signed = false;
        let report = Report::from_entry(&plain, &fields(), Some(" ".to_string()));
        let html = report.render_html(&registry()).unwrap();

        assert!(!html.contains("Comentarios de la jornada"));
        assert!(!html.contains("Adjuntos"));
        assert!(!html.contains("<img"));
    }
}
