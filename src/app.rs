#![cfg(feature = "web")]

use axum::{
    Extension, Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    middleware,
    response::{Html, Redirect},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Local;
use handlebars::{Handlebars, TemplateError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::catalog::{Catalog, LOG_SHEET, LogEntry, MAX_FIELDS, Project, project_names};
use crate::config::Config;
use crate::error::AppError;
use crate::login::{
    CurrentSession, LOGIN_TEMPLATE, Photo, SESSION_COOKIE, add_photos, clear_photos,
    drain_photos, handle_login, handle_logout, photo_count, require_auth, serve_login_page,
    session_photos, validate_session,
};
use crate::logo::LogoCache;
use crate::mailer::{OutgoingEmail, Outbox, deliver, open_outbox, parse_address};
use crate::photo::{
    Attachment, PhotoError, camera_name, gallery_name, sanitize_image, signature_from_data_url,
    thumbnail_b64,
};
use crate::report::{self, Report};
use crate::store::{ReadCache, SheetStore, open_store};

pub const FORM_TEMPLATE: &str = "form";
pub const NO_PROJECTS: &str = "No hay proyectos asignados a este equipo.";

/// Phones produce large pictures; the default 2 MB body limit is too small.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn SheetStore>,
    pub cache: ReadCache,
    pub outbox: Arc<dyn Outbox>,
    pub logos: LogoCache,
    pub templates: Handlebars<'static>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SheetStore>,
        outbox: Arc<dyn Outbox>,
        logos: LogoCache,
        cache_ttl: Duration,
    ) -> Result<Self, TemplateError> {
        Ok(AppState {
            store,
            cache: ReadCache::new(cache_ttl),
            outbox,
            logos,
            templates: templates()?,
        })
    }
}

/// Page and email templates, compiled into the binary.
pub fn templates() -> Result<Handlebars<'static>, TemplateError> {
    let mut hb = Handlebars::new();
    hb.register_template_string(LOGIN_TEMPLATE, include_str!("./templates/login.hbs"))?;
    hb.register_template_string(FORM_TEMPLATE, include_str!("./templates/form.hbs"))?;
    report::register(&mut hb)?;
    Ok(hb)
}

/// Project and work type picked in the form selectors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub proyecto: Option<String>,
    #[serde(default)]
    pub trabajo: Option<String>,
}

/// Fields posted by the report form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub proyecto: String,
    #[serde(default)]
    pub trabajo: String,
    #[serde(default)]
    pub dato1: String,
    #[serde(default)]
    pub dato2: String,
    #[serde(default)]
    pub dato3: String,
    #[serde(default)]
    pub comentarios: String,
    /// Canvas `data:` URL, empty when the pad was not touched
    #[serde(default)]
    pub firma_responsable: String,
    #[serde(default)]
    pub firma_cliente: String,
}

impl SubmitForm {
    fn measurements(&self) -> [&str; MAX_FIELDS] {
        [&self.dato1, &self.dato2, &self.dato3]
    }

    /// Store a text field posted under `name`. Unknown names are ignored.
    fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "proyecto" => &mut self.proyecto,
            "trabajo" => &mut self.trabajo,
            "dato1" => &mut self.dato1,
            "dato2" => &mut self.dato2,
            "dato3" => &mut self.dato3,
            "comentarios" => &mut self.comentarios,
            "firma_responsable" => &mut self.firma_responsable,
            "firma_cliente" => &mut self.firma_cliente,
            _ => return,
        };
        *slot = value;
    }

    fn selection(&self) -> Selection {
        Selection {
            proyecto: Some(self.proyecto.clone()),
            trabajo: Some(self.trabajo.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub name: String,
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct MeasurementField {
    /// Form field name (`dato1`..`dato3`)
    pub name: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct Thumbnail {
    pub name: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct Confirmation {
    pub title: String,
    pub detail: String,
}

/// Everything the form page shows; also served as JSON by `/api/form`.
#[derive(Debug, Default, Serialize)]
pub struct FormModel {
    pub date: String,
    pub team: String,
    pub projects: Vec<Choice>,
    pub work_types: Vec<Choice>,
    pub project: Option<String>,
    pub work_type: Option<String>,
    pub logo_src: Option<String>,
    pub fields: Vec<MeasurementField>,
    pub comments: String,
    /// Signature pad contents to draw back after a round trip
    pub firma_responsable: String,
    pub firma_cliente: String,
    pub photos: Vec<Thumbnail>,
    pub photo_count: usize,
    pub notice: Option<String>,
    pub load_error: Option<String>,
    pub success: Option<Confirmation>,
    pub errors: Vec<String>,
}

pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let protected = Router::new()
        .route("/form", get(serve_form))
        .route("/api/form", get(form_json))
        .route(
            "/photos",
            post(upload_photos).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/photos/clear", post(clear_session_photos))
        .route("/submit", post(submit_report))
        .route_layer(middleware::from_fn(require_auth));

    Router::new()
        .route("/", get(index))
        .route("/login", get(serve_login_page).post(handle_login))
        .route("/logout", post(handle_logout))
        .merge(protected)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server described by `config`.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.sheets)?;
    let outbox = open_outbox(&config)?;
    let logos = LogoCache::with_timeout(
        Duration::from_secs(config.logo.timeout_secs),
        Duration::from_secs(config.logo.cache_ttl_secs),
    )?;
    let state = Arc::new(AppState::new(
        store,
        outbox,
        logos,
        Duration::from_secs(config.sheets.cache_ttl_secs),
    )?);

    let app = router(state, &config.server.static_dir);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    match local_ip_address::local_ip() {
        Ok(ip) => info!("Open http://{}:{} from a phone on this network", ip, config.server.port),
        Err(e) => warn!("could not determine the LAN address: {}", e),
    }

    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(jar: CookieJar) -> Redirect {
    let logged_in = jar
        .get(SESSION_COOKIE)
        .and_then(|c| validate_session(c.value()))
        .is_some();
    Redirect::to(if logged_in { "/form" } else { "/login" })
}

fn pick<'a>(options: &[&'a str], wanted: Option<&str>) -> Option<&'a str> {
    wanted
        .map(str::trim)
        .and_then(|w| options.iter().find(|o| **o == w))
        .or_else(|| options.first())
        .copied()
}

fn choices(options: &[&str], selected: Option<&str>) -> Vec<Choice> {
    options
        .iter()
        .map(|name| Choice {
            name: name.to_string(),
            selected: Some(*name) == selected,
        })
        .collect()
}

/// Assemble the form for the team of `session`
///
/// Unknown or missing selections fall back to the first project and work
/// type. Datastore failures end up in `load_error` rather than failing the
/// request, so the page can still offer the logout button.
pub async fn build_form(
    state: &AppState,
    session: &CurrentSession,
    selection: &Selection,
) -> FormModel {
    let photos = session_photos(&session.id);
    let mut model = FormModel {
        date: Local::now().format("%d · %m · %Y").to_string(),
        team: session.team.clone(),
        photo_count: photos.len(),
        photos: photos
            .into_iter()
            .map(|p| Thumbnail {
                name: p.attachment.filename,
                data: p.thumbnail,
            })
            .collect(),
        ..FormModel::default()
    };

    let catalog = match Catalog::load(state.store.as_ref(), &state.cache).await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("could not load configuration sheets: {}", e);
            model.load_error = Some(format!(
                "Error de conexión con la hoja de cálculo. Detalle: {}",
                e
            ));
            return model;
        }
    };

    let visible = catalog.projects_for_team(&session.team);
    let names = project_names(&visible);
    let Some(project) = pick(&names, selection.proyecto.as_deref()) else {
        model.notice = Some(NO_PROJECTS.to_string());
        return model;
    };
    let kinds = catalog.work_types();
    let kind = pick(&kinds, selection.trabajo.as_deref());

    model.projects = choices(&names, Some(project));
    model.work_types = choices(&kinds, kind);
    model.project = Some(project.to_string());
    model.work_type = kind.map(str::to_string);

    if let Some(template) = kind.and_then(|k| catalog.template(k)) {
        model.fields = template
            .active_fields()
            .into_iter()
            .enumerate()
            .map(|(i, label)| MeasurementField {
                name: format!("dato{}", i + 1),
                label,
                value: String::new(),
            })
            .collect();
    }

    if let Some(p) = catalog.project(project) {
        model.logo_src = state.logos.data_url(&p.logo_url).await;
    }
    model
}

/// Put back what the crew had typed, so a reload does not make them enter it twice.
fn keep_entries(model: &mut FormModel, form: &SubmitForm) {
    for (field, value) in model.fields.iter_mut().zip(form.measurements()) {
        field.value = value.to_string();
    }
    model.comments = form.comentarios.clone();
    model.firma_responsable = form.firma_responsable.clone();
    model.firma_cliente = form.firma_cliente.clone();
}

fn render_form(state: &AppState, model: &FormModel) -> Result<Html<String>, AppError> {
    Ok(Html(state.templates.render(FORM_TEMPLATE, model)?))
}

async fn serve_form(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
    Query(selection): Query<Selection>,
) -> Result<Html<String>, AppError> {
    let model = build_form(&state, &session, &selection).await;
    render_form(&state, &model)
}

async fn form_json(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
    Query(selection): Query<Selection>,
) -> Json<FormModel> {
    Json(build_form(&state, &session, &selection).await)
}

fn prepare_photo(stem: &str, content: &[u8]) -> Result<Photo, PhotoError> {
    let attachment = sanitize_image(stem, content)?;
    let thumbnail = thumbnail_b64(&attachment.content)?;
    Ok(Photo {
        attachment,
        thumbnail,
    })
}

fn bad_upload(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(e.to_string())
}

/// Add camera captures and gallery uploads to the session
///
/// The upload is posted from the report form, so the measurements, comments
/// and signatures come along and are shown again. A file that can't be
/// decoded is reported and skipped; the others are kept.
async fn upload_photos(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
    mut multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let mut draft = SubmitForm::default();
    let mut added: Vec<Photo> = Vec::new();
    let mut errors = Vec::new();
    let existing = photo_count(&session.id);

    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "camera" && name != "gallery" {
            let value = field.text().await.map_err(bad_upload)?;
            draft.set_field(&name, value);
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.map_err(bad_upload)?;
        if content.is_empty() {
            continue;
        }
        let stem = if name == "camera" {
            camera_name(existing + added.len() + 1)
        } else {
            gallery_name(&file_name)
        };
        match prepare_photo(&stem, &content) {
            Ok(photo) => added.push(photo),
            Err(e) => {
                warn!("rejected upload '{}': {}", file_name, e);
                errors.push(e.to_string());
            }
        }
    }

    if !added.is_empty() {
        let total = add_photos(&session.id, added).unwrap_or_default();
        info!("team '{}' now has {} photo(s) ready", session.team, total);
    }

    let mut model = build_form(&state, &session, &draft.selection()).await;
    keep_entries(&mut model, &draft);
    model.errors = errors;
    render_form(&state, &model)
}

/// `/form` URL that keeps the current selection
pub fn form_url(selection: &Selection) -> String {
    let mut params = Vec::new();
    if let Some(p) = selection.proyecto.as_deref().filter(|p| !p.is_empty()) {
        params.push(format!("proyecto={}", urlencoding::encode(p)));
    }
    if let Some(t) = selection.trabajo.as_deref().filter(|t| !t.is_empty()) {
        params.push(format!("trabajo={}", urlencoding::encode(t)));
    }
    if params.is_empty() {
        "/form".to_string()
    } else {
        format!("/form?{}", params.join("&"))
    }
}

async fn clear_session_photos(
    Extension(session): Extension<CurrentSession>,
    Form(selection): Form<Selection>,
) -> Redirect {
    clear_photos(&session.id);
    Redirect::to(&form_url(&selection))
}

/// Measurements for the active fields, in order
///
/// Blank inputs count as zero. Commas are accepted as decimal separators.
/// Negative or non-numeric input is rejected with a message naming the field.
pub fn parse_measurements(
    fields: &[String],
    raw: [&str; MAX_FIELDS],
) -> Result<[f64; MAX_FIELDS], String> {
    let mut values = [0.0; MAX_FIELDS];
    for (i, label) in fields.iter().enumerate().take(MAX_FIELDS) {
        let text = raw[i].trim();
        if text.is_empty() {
            continue;
        }
        match text.replace(',', ".").parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => values[i] = v,
            _ => return Err(format!("Valor no válido para {}: {}", label, text)),
        }
    }
    Ok(values)
}

async fn send_report(
    state: &AppState,
    report: &Report,
    to: Vec<String>,
    photos: Vec<Photo>,
    manager: Option<Vec<u8>>,
    client: Option<Vec<u8>>,
) -> Result<(), AppError> {
    let html = report.render_html(&state.templates)?;

    let mut attachments: Vec<Attachment> = photos.into_iter().map(|p| p.attachment).collect();
    if let Some(jpeg) = manager {
        attachments.push(Attachment::jpeg("firma_responsable.jpg", jpeg));
    }
    if let Some(jpeg) = client {
        attachments.push(Attachment::jpeg("firma_cliente.jpg", jpeg));
    }

    let email = OutgoingEmail {
        to,
        subject: report.subject(),
        html,
        attachments,
    };
    deliver(state.outbox.clone(), email).await?;
    Ok(())
}

/// Log the day's work and email the report
///
/// Both steps always run: a datastore failure does not stop the email, and
/// the other way round. The photos that went out are removed from the gallery
/// only when nothing failed, so the crew can retry without taking them again.
///
/// # Returns
/// * `Ok(Report)` - what was sent, for the confirmation box
/// * `Err(Vec<String>)` - every failure, prefixed with the step that failed
pub async fn process_submission(
    state: &AppState,
    session: &CurrentSession,
    form: &SubmitForm,
) -> Result<Report, Vec<String>> {
    let catalog = Catalog::load(state.store.as_ref(), &state.cache)
        .await
        .map_err(|e| vec![format!("Sheets: {}", e)])?;

    let visible = catalog.projects_for_team(&session.team);
    let project: &Project = visible
        .iter()
        .find(|p| p.name == form.proyecto.trim())
        .copied()
        .ok_or_else(|| vec![format!("Proyecto desconocido: {}", form.proyecto)])?;
    let template = catalog
        .template(form.trabajo.trim())
        .ok_or_else(|| vec![format!("Trabajo desconocido: {}", form.trabajo)])?;

    let fields = template.active_fields();
    let values = parse_measurements(&fields, form.measurements()).map_err(|e| vec![e])?;
    let manager = signature_from_data_url(&form.firma_responsable).map_err(|e| vec![e.to_string()])?;
    let client = signature_from_data_url(&form.firma_cliente).map_err(|e| vec![e.to_string()])?;
    let photos = session_photos(&session.id);
    let photos_sent = photos.len();

    let entry = LogEntry {
        timestamp: Local::now(),
        team: session.team.clone(),
        project: project.name.clone(),
        work_type: template.kind.clone(),
        values,
        comments: form.comentarios.trim().to_string(),
        photos: photos.len(),
        manager_signed: manager.is_some(),
        client_signed: client.is_some(),
    };

    let mut errors = Vec::new();

    if let Err(e) = state.store.append(LOG_SHEET, entry.to_row()).await {
        error!("could not log report for '{}': {}", project.name, e);
        errors.push(format!("Sheets: {}", e));
    }

    let logo_src = match state.logos.data_url(&project.logo_url).await {
        Some(data_url) => Some(data_url),
        None => Some(project.logo_url.trim().to_string()),
    };
    let report = Report::from_entry(&entry, &fields, logo_src);

    // One mistyped contact should not stop the report reaching the others
    let recipients: Vec<String> = project
        .recipients()
        .into_iter()
        .filter(|r| match parse_address(r) {
            Ok(_) => true,
            Err(e) => {
                warn!("skipping contact '{}' of '{}': {}", r, project.name, e);
                false
            }
        })
        .collect();
    if recipients.is_empty() {
        info!("no contact emails for '{}', email skipped", project.name);
    } else if let Err(e) = send_report(state, &report, recipients, photos, manager, client).await {
        error!("could not email report for '{}': {}", project.name, e);
        errors.push(format!("Email: {}", e));
    }

    if errors.is_empty() {
        drain_photos(&session.id, photos_sent);
        info!(
            "team '{}' reported {} on '{}'",
            session.team, report.work_type, report.project
        );
        Ok(report)
    } else {
        Err(errors)
    }
}

async fn submit_report(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
    Form(form): Form<SubmitForm>,
) -> Result<Html<String>, AppError> {
    let outcome = process_submission(&state, &session, &form).await;

    let mut model = build_form(&state, &session, &form.selection()).await;
    match outcome {
        Ok(report) => {
            model.success = Some(Confirmation {
                title: report.success_title(),
                detail: report.success_detail(),
            });
        }
        Err(errors) => {
            keep_entries(&mut model, &form);
            model.errors = errors;
        }
    }
    render_form(&state, &model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_measurements_blank_is_zero() {
        let fields = labels(&["m2 colocados", "ml rodapié"]);
        assert_eq!(
            parse_measurements(&fields, ["12,5", "", "99"]).unwrap(),
            [12.5, 0.0, 0.0]
        );
    }

    #[test]
    fn test_measurements_reject_bad_input() {
        let fields = labels(&["m2 colocados"]);
        assert_eq!(
            parse_measurements(&fields, ["-3", "", ""]).unwrap_err(),
            "Valor no válido para m2 colocados: -3"
        );
        assert!(parse_measurements(&fields, ["abc", "", ""]).is_err());
        assert!(parse_measurements(&fields, ["NaN", "", ""]).is_err());
    }

    #[test]
    fn test_pick_falls_back_to_first() {
        let options = ["Casa Puig", "Hotel Mar"];
        assert_eq!(pick(&options, Some(" Hotel Mar ")), Some("Hotel Mar"));
        assert_eq!(pick(&options, Some("Otra")), Some("Casa Puig"));
        assert_eq!(pick(&options, None), Some("Casa Puig"));
        assert_eq!(pick(&[], Some("Casa Puig")), None);
    }

    #[test]
    fn test_form_url_keeps_selection() {
        let selection = Selection {
            proyecto: Some("Casa Puig".to_string()),
            trabajo: Some("Instalación".to_string()),
        };
        assert_eq!(
            form_url(&selection),
            "/form?proyecto=Casa%20Puig&trabajo=Instalaci%C3%B3n"
        );
        assert_eq!(form_url(&Selection::default()), "/form");
    }

    #[test]
    fn test_templates_compile() {
        let hb = templates().unwrap();
        assert!(hb.has_template(LOGIN_TEMPLATE));
        assert!(hb.has_template(FORM_TEMPLATE));
        assert!(hb.has_template(report::REPORT_TEMPLATE));
    }
}
