//! Linux sysfs GPIO backend (`/sys/class/gpio`).
//!
//! Claiming a line writes its number to `export`. The kernel then creates
//! `gpioN/` with `direction` and `value` attributes. udev may still be fixing
//! permissions when the write returns, so claim waits for `value` to appear.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{LineId, LineProvider};
use crate::{Error, Result};

/// Default sysfs GPIO class directory.
pub const DEFAULT_ROOT: &str = "/sys/class/gpio";

/// Mode of an exposed `value` attribute (group may drive the line).
const EXPOSED_MODE: u32 = 0o664;

/// Mode of a private `value` attribute.
const PRIVATE_MODE: u32 = 0o644;

/// Poll interval while waiting for an exported line directory.
const EXPORT_POLL: Duration = Duration::from_millis(10);

/// GPIO backend using the legacy sysfs interface.
#[derive(Debug, Clone)]
pub struct SysfsProvider {
    root: PathBuf,
    export_timeout: Duration,
}

impl SysfsProvider {
    /// Creates a backend rooted at the given GPIO class directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            export_timeout: Duration::from_millis(500),
        }
    }

    /// Sets how long claim waits for the line directory to appear.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Returns the GPIO class directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn attr(&self, id: LineId, name: &str) -> PathBuf {
        self.root.join(format!("gpio{}", id)).join(name)
    }

    fn write_attr(&self, id: LineId, name: &str, value: &str) -> Result<()> {
        let path = self.attr(id, name);
        fs::write(&path, value).map_err(|e| classify(id, e))?;
        debug!("sysfs: {} <- {}", path.display(), value);
        Ok(())
    }

    fn wait_for_line(&self, id: LineId) -> Result<()> {
        let value = self.attr(id, "value");
        let deadline = Instant::now() + self.export_timeout;
        while !value.exists() {
            if Instant::now() >= deadline {
                return Err(Error::LineUnavailable {
                    id,
                    reason: format!("{} did not appear after export", value.display()),
                });
            }
            std::thread::sleep(EXPORT_POLL);
        }
        Ok(())
    }

    fn set_mode(&self, id: LineId, mode: u32) -> Result<()> {
        let path = self.attr(id, "value");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| classify(id, e))
    }
}

impl Default for SysfsProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

/// Maps an I/O error on a line attribute to a registry error.
fn classify(id: LineId, err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::EBUSY) => Error::LineBusy { id },
        Some(libc::EINVAL) | Some(libc::ENOENT) | Some(libc::EACCES) | Some(libc::EPERM) => {
            Error::LineUnavailable {
                id,
                reason: err.to_string(),
            }
        }
        _ => Error::Io(err),
    }
}

impl LineProvider for SysfsProvider {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn claim(&mut self, id: LineId, label: &str) -> Result<()> {
        let export = self.root.join("export");
        fs::write(&export, id.to_string()).map_err(|e| classify(id, e))?;
        if let Err(e) = self.wait_for_line(id) {
            // The export went through, so the caller will not free this line.
            let unexport = self.root.join("unexport");
            if let Err(undo) = fs::write(&unexport, id.to_string()) {
                warn!("sysfs: failed to unexport gpio{} after timeout: {}", id, undo);
            }
            return Err(e);
        }
        debug!("sysfs: exported gpio{} for {}", id, label);
        Ok(())
    }

    fn set_output(&mut self, id: LineId, level: bool) -> Result<()> {
        // "high"/"low" switch to output and set the level in one write.
        self.write_attr(id, "direction", if level { "high" } else { "low" })
    }

    fn expose(&mut self, id: LineId) -> Result<()> {
        self.set_mode(id, EXPOSED_MODE)
    }

    fn set_level(&mut self, id: LineId, level: bool) -> Result<()> {
        self.write_attr(id, "value", if level { "1" } else { "0" })
    }

    fn level(&mut self, id: LineId) -> Result<bool> {
        let raw = fs::read_to_string(self.attr(id, "value")).map_err(|e| classify(id, e))?;
        Ok(raw.trim() == "1")
    }

    fn unexpose(&mut self, id: LineId) -> Result<()> {
        self.set_mode(id, PRIVATE_MODE)
    }

    fn free(&mut self, id: LineId) -> Result<()> {
        let unexport = self.root.join("unexport");
        fs::write(&unexport, id.to_string()).map_err(|e| classify(id, e))?;
        debug!("sysfs: unexported gpio{}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a fake GPIO class directory with the given lines pre-created.
    fn fake_root(ids: &[LineId]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for id in ids {
            let line = dir.path().join(format!("gpio{}", id));
            fs::create_dir(&line).unwrap();
            fs::write(line.join("direction"), "in").unwrap();
            fs::write(line.join("value"), "0").unwrap();
        }
        dir
    }

    #[test]
    fn test_claim_writes_export() {
        let root = fake_root(&[17]);
        let mut gpio = SysfsProvider::new(root.path());
        gpio.claim(17, "test").unwrap();
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "17");
    }

    #[test]
    fn test_claim_times_out_without_line_dir() {
        let root = fake_root(&[]);
        let mut gpio =
            SysfsProvider::new(root.path()).with_export_timeout(Duration::from_millis(20));
        assert!(matches!(
            gpio.claim(5, "test"),
            Err(Error::LineUnavailable { id: 5, .. })
        ));
        assert_eq!(fs::read_to_string(root.path().join("unexport")).unwrap(), "5");
    }

    #[test]
    fn test_failed_acquire_leaves_nothing_exported() {
        let root = fake_root(&[]);
        let gpio = SysfsProvider::new(root.path()).with_export_timeout(Duration::from_millis(20));
        let result = crate::PinRegistry::acquire_all(gpio, &[5], "test");
        assert!(matches!(result, Err(Error::LineUnavailable { id: 5, .. })));
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "5");
        assert_eq!(fs::read_to_string(root.path().join("unexport")).unwrap(), "5");
    }

    #[test]
    fn test_output_and_level() {
        let root = fake_root(&[22]);
        let mut gpio = SysfsProvider::new(root.path());
        gpio.claim(22, "test").unwrap();
        gpio.set_output(22, false).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("gpio22/direction")).unwrap(),
            "low"
        );

        gpio.set_level(22, true).unwrap();
        assert!(gpio.level(22).unwrap());
        gpio.set_level(22, false).unwrap();
        assert!(!gpio.level(22).unwrap());
    }

    #[test]
    fn test_expose_changes_mode() {
        let root = fake_root(&[23]);
        let mut gpio = SysfsProvider::new(root.path());
        let value = root.path().join("gpio23/value");

        gpio.expose(23).unwrap();
        let mode = fs::metadata(&value).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, EXPOSED_MODE);

        gpio.unexpose(23).unwrap();
        let mode = fs::metadata(&value).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, PRIVATE_MODE);
    }

    #[test]
    fn test_free_writes_unexport() {
        let root = fake_root(&[24]);
        let mut gpio = SysfsProvider::new(root.path());
        gpio.free(24).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("unexport")).unwrap(),
            "24"
        );
    }

    #[test]
    fn test_missing_line_is_unavailable() {
        let root = fake_root(&[]);
        let mut gpio = SysfsProvider::new(root.path());
        assert!(matches!(
            gpio.set_level(3, true),
            Err(Error::LineUnavailable { id: 3, .. })
        ));
    }

    #[test]
    #[ignore]
    fn test_real_sysfs_present() {
        assert!(Path::new(DEFAULT_ROOT).join("export").exists());
    }
}
