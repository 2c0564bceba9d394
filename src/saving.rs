use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::spreadsheet::Workbook;

pub fn save_workbook(workbook: &Workbook, filename: impl AsRef<Path>) -> std::io::Result<()> {
    let path = filename.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // Write next to the target and rename so a crash never leaves half a workbook
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = std::io::BufWriter::new(encoder);

        serialize_into(&mut writer, workbook)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    std::fs::rename(&tmp, path)
}

pub fn load_workbook(filename: impl AsRef<Path>) -> std::io::Result<Workbook> {
    let file = File::open(filename)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let workbook: Workbook = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(workbook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::Row;

    #[test]
    fn test_workbook_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("seguiment.bin.gz");

        let mut book = Workbook::new();
        book.append(
            "Seguiment",
            Row::new()
                .with("Proyecto", "Casa Puig")
                .with("Dato1", 12.5)
                .with("Comentarios", ""),
        );

        save_workbook(&book, &path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let loaded = load_workbook(&path).unwrap();
        assert_eq!(loaded, book);
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin.gz");
        std::fs::write(&path, b"not a workbook").unwrap();

        assert!(load_workbook(&path).is_err());
    }
}
