/*!
 * Filesystem utilities shared by the pipeline.
 *
 * Output and recovery files are only ever produced through the atomic
 * writers here: data goes to a same-directory temporary file, is fsynced,
 * renamed into place, and the directory is fsynced where the platform
 * supports it. Every destination path is checked component by component for
 * symlinks before any write.
 */

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

/// File permissions for pipeline outputs (owner read/write only).
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o600;

/// Returns an error if any existing component of the path is a symlink.
///
/// The walk starts at the filesystem root of the absolute form of `path` and
/// lstats each component. Missing components end the walk: a path that does
/// not exist yet cannot be a symlink.
pub fn reject_symlink_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("path is empty"));
    }

    let abs = absolutize(path)?;
    let mut current = PathBuf::new();
    for component in abs.components() {
        match component {
            Component::Prefix(p) => current.push(p.as_os_str()),
            Component::RootDir => current.push(Component::RootDir.as_os_str()),
            Component::Normal(part) => {
                current.push(part);
                match fs::symlink_metadata(&current) {
                    Ok(meta) => {
                        if meta.file_type().is_symlink() {
                            return Err(anyhow!(
                                "refusing to write to symlink path: {} (symlink detected at {})",
                                abs.display(),
                                current.display()
                            ));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("failed to access path component: {}", current.display())
                        });
                    }
                }
            }
            // `..`/`.` cannot appear in an absolutized path.
            _ => {}
        }
    }
    Ok(())
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        Ok(cwd.join(path))
    }
}

/// Write data atomically: same-directory temp file, fsync, rename, dir fsync.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    reject_symlink_path(path)?;
    let dir = parent_dir(path)?;

    let tmp_path = dir.join(format!(".subtrans-{}.tmp", Uuid::new_v4().simple()));
    write_temp(&tmp_path, data)?;

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("failed to move temp file to {}", path.display()));
    }
    sync_dir(&dir);
    Ok(())
}

/// Atomic write that tolerates temp-name collisions by retrying the
/// destination with `_1..9` suffixes. Used for recovery-log persistence,
/// where two racing processes must never clobber each other's temp file.
pub fn atomic_write_exclusive(path: &Path, data: &[u8]) -> Result<PathBuf> {
    reject_symlink_path(path)?;
    let dir = parent_dir(path)?;
    let (stem, ext) = split_name(path)?;

    let mut last_err = None;
    for i in 0..10 {
        let candidate = if i == 0 {
            path.to_path_buf()
        } else {
            dir.join(format!("{}_{}{}", stem, i, ext))
        };
        let mut tmp_os = candidate.clone().into_os_string();
        tmp_os.push(".tmp");
        let tmp_path = PathBuf::from(tmp_os);

        let open = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path);
        let mut tmp = match open {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                last_err = Some(anyhow!(e).context("temp file already exists"));
                continue;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create temp file {}", tmp_path.display()));
            }
        };

        set_output_permissions(&tmp)?;
        if let Err(e) = tmp.write_all(data).and_then(|_| tmp.sync_all()) {
            drop(tmp);
            let _ = fs::remove_file(&tmp_path);
            return Err(e).context("failed to write temp file");
        }
        drop(tmp);

        if let Err(e) = fs::rename(&tmp_path, &candidate) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e)
                .with_context(|| format!("failed to move temp file to {}", candidate.display()));
        }
        sync_dir(&dir);
        return Ok(candidate);
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to create log file")))
}

fn write_temp(tmp_path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)
        .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
    set_output_permissions(&tmp)?;
    if let Err(e) = tmp.write_all(data).and_then(|_| tmp.sync_all()) {
        drop(tmp);
        let _ = fs::remove_file(tmp_path);
        return Err(e).context("failed to write temp file");
    }
    Ok(())
}

#[cfg(unix)]
fn set_output_permissions(file: &File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(OUTPUT_MODE))
        .context("failed to set temp file permissions")
}

#[cfg(not(unix))]
fn set_output_permissions(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    match File::open(dir) {
        Ok(f) => {
            if let Err(e) = f.sync_all() {
                log::warn!(
                    "Directory fsync failed (safe to ignore on some platforms): path={} error={}",
                    dir.display(),
                    e
                );
            }
        }
        Err(e) => {
            log::warn!("Directory open for fsync failed: path={} error={}", dir.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(dir: &Path) {
    // Directory handles cannot be fsynced portably here.
    log::info!("Directory fsync not supported on this platform; skipping: path={}", dir.display());
}

/// Returns a non-existing path by appending `_1..9`, then a UUID suffix.
/// If the original path does not exist it is returned unchanged; the bool
/// reports whether the path was adjusted.
pub fn safe_path(path: &Path) -> Result<(PathBuf, bool)> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("path is empty"));
    }
    if !path.exists() {
        return Ok((path.to_path_buf(), false));
    }

    let dir = parent_dir(path)?;
    let (stem, ext) = split_name(path)?;

    for i in 1..=9 {
        let candidate = dir.join(format!("{}_{}{}", stem, i, ext));
        if !candidate.exists() {
            return Ok((candidate, true));
        }
    }

    let suffix = Uuid::now_v7().to_string();
    Ok((dir.join(format!("{}_{}{}", stem, suffix, ext)), true))
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    match parent {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(PathBuf::from(".")),
    }
}

fn split_name(path: &Path) -> Result<(String, String)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?
        .to_string_lossy()
        .to_string();
    match path.extension() {
        Some(ext) => {
            let ext = format!(".{}", ext.to_string_lossy());
            let stem = file_name
                .strip_suffix(&ext)
                .unwrap_or(&file_name)
                .to_string();
            Ok((stem, ext))
        }
        None => Ok((file_name, String::new())),
    }
}
