use crate::camera_api::SaveFormat;
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

/// `<base>/<YYYY-MM-DD>/photo_<YYYY-MM-DD_HH-MM-SS>.<ext>`, creating the
/// base and day folders when missing.
///
/// Names have one second resolution. Two captures within the same second
/// map to the same file, which the scheduler's one second pacing floor
/// rules out.
pub fn archive_path(base: &Path, now: NaiveDateTime, format: SaveFormat) -> Result<PathBuf> {
    create_folder(base)?;
    let day_folder = base.join(now.format("%Y-%m-%d").to_string());
    create_folder(&day_folder)?;
    Ok(day_folder.join(format!(
        "photo_{}.{}",
        now.format("%Y-%m-%d_%H-%M-%S"),
        format.extension()
    )))
}

fn create_folder(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::Directory {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn builds_day_partitioned_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("images");

        let path = archive_path(&base, at(14, 5, 9), SaveFormat::Jpg).unwrap();

        assert_eq!(
            path,
            base.join("2024-03-07").join("photo_2024-03-07_14-05-09.jpg")
        );
        assert!(base.join("2024-03-07").is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn second_call_same_day_reuses_folder() {
        let dir = tempfile::tempdir().unwrap();
        let first = archive_path(dir.path(), at(0, 0, 0), SaveFormat::Png).unwrap();
        fs::write(&first, b"x").unwrap();

        let second = archive_path(dir.path(), at(23, 59, 59), SaveFormat::Png).unwrap();

        assert_eq!(first.parent(), second.parent());
        assert!(first.exists(), "existing day folder was recreated");
        assert_eq!(
            second.file_name().unwrap(),
            "photo_2024-03-07_23-59-59.png"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn same_clock_gives_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive_path(dir.path(), at(8, 30, 0), SaveFormat::Jpg).unwrap();
        let b = archive_path(dir.path(), at(8, 30, 0), SaveFormat::Jpg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unusable_base_is_a_directory_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();

        let err = archive_path(&file, at(1, 2, 3), SaveFormat::Jpg).unwrap_err();
        assert!(matches!(err, Error::Directory { .. }));
    }
}
