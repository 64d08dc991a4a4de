//! Output path allocation: one dated folder per day, subdivided into
//! numbered run folders so successive sessions on the same day don't
//! collide.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Allocate (creating if necessary) the next numbered run folder under
/// `base_dir/YYYY-MM-DD/`. Folders are named `01`, `02`, ... zero-padded
/// to two digits; the first run of a new day always starts at `01`.
pub fn allocate_run_dir(base_dir: &Path, date: chrono::NaiveDate) -> Result<PathBuf> {
    let day_dir = base_dir.join(date.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&day_dir)?;

    let mut next = 1u32;
    if let Ok(entries) = fs::read_dir(&day_dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(n) = name.parse::<u32>() {
                    next = next.max(n + 1);
                }
            }
        }
    }

    let run_dir = day_dir.join(format!("{next:02}"));
    fs::create_dir_all(&run_dir)?;
    Ok(run_dir)
}

/// The filename for the `index`-th (0-based) frame of camera
/// `camera_index` in an image-files sink, e.g. `img-cam0-0043.png` for
/// `index == 42`. Numbering on disk is 1-based, 4-digit zero-filled.
pub fn image_file_name(camera_index: usize, index: u64, extension: &str) -> String {
    format!("img-cam{camera_index}-{:04}.{extension}", index + 1)
}
