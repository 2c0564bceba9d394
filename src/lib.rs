/*!
# Estellé Parquet Seguiment

Daily progress logging for flooring-installation crews, built in Rust.

## Overview

Crews open a form on their phone, log in with a team PIN, pick a project and
the kind of work they did, enter up to three measurements, take photos and
collect signatures. On submit one row is appended to a spreadsheet and an HTML
report is emailed to the project's contacts.

The form is driven entirely by spreadsheet rows: adding a project, a work type
or a team means adding a row, not changing code.

## Architecture

### Frontend Layer
- **Technologies**: HTML rendered with Handlebars, CSS, a small canvas script
- **Key Components**:
  - PIN login page
  - Project / work type selectors with the client logo
  - Measurement inputs built from the selected work type
  - Photo gallery (camera capture and multi-upload) kept in the session
  - Two signature pads (site manager, client)

### Backend Layer
- **Technologies**: Rust, axum
- **Core Components**:
  - Sheet Store - `read(sheet)` and `append(sheet, row)` over a local workbook
    file, a directory of CSV files or Google Sheets
  - Catalog - typed projects, work-type templates and teams
  - Photo pipeline - EXIF rotation, resizing and JPEG re-encoding
  - Report - email HTML and confirmation text
  - Mailer - SMTP with STARTTLS, or `.eml` files for development

### Data Persistence Layer
- Workbook file with Gzip compression and bincode serialization
- CSV import/export, XLSX export
- Google Sheets v4 values API

## Sheets

| Sheet              | Columns                                                          |
|--------------------|------------------------------------------------------------------|
| `Projectes`        | `Nom`, `Equip`, `Emails_Contacte`, `Logo_client`                 |
| `Config_Templates` | `Tipus`, `Camp1`, `Camp2`, `Camp3`                               |
| `Equips`           | `Equip`, `PIN`                                                   |
| `Seguiment`        | `Fecha`, `Hora`, `Equipo`, `Proyecto`, `Trabajo`, `Dato1`..`Dato3`, `Comentarios`, `Fotos`, `Firmas` |

## Modules

- **cell**: Loosely typed cell values
- **spreadsheet**: Named worksheets, rows and workbooks
- **loader** / **downloader**: CSV import, CSV and XLSX export
- **saving**: Workbook persistence with compression
- **store**: The spreadsheet-service client and its backends
- **gsheets**: Google Sheets backend
- **catalog**: Projects, templates, teams and the log row
- **config**: `seguiment.toml`
- **login**: PIN login and sessions
- **photo**: Image sanitization and signatures
- **logo**: Client logo download and embedding
- **report**: Email content
- **mailer**: Email delivery
- **app**: Routing and handlers

## Routes

- `/login` - PIN login, `/logout`
- `/form` - The report form (`?proyecto=&trabajo=`)
- `/api/form` - The same form as JSON
- `/photos`, `/photos/clear` - Session photo gallery
- `/submit` - Log the work and email the report
*/

pub mod catalog;
pub mod cell;
pub mod config;
pub mod downloader;
pub mod loader;
pub mod report;
pub mod saving;
pub mod spreadsheet;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod error;
#[cfg(feature = "web")]
pub mod gsheets;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod logo;
#[cfg(feature = "web")]
pub mod mailer;
#[cfg(feature = "web")]
pub mod photo;

/// Re-export the data layer to make it easier to use
pub use cell::*;
pub use saving::*;
pub use spreadsheet::*;
