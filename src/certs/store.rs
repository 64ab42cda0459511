//! PEM persistence for bootstrapped TLS material

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::CertificateError;

/// Create `dir` (and parents) if needed
pub fn ensure_dir(dir: &Path) -> Result<(), CertificateError> {
    fs::create_dir_all(dir).map_err(|source| CertificateError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write a certificate. Certificates are public and stay world-readable.
pub fn write_public(path: &Path, pem: &str) -> Result<(), CertificateError> {
    write_pem(path, pem, 0o644)
}

/// Write a private key, readable by the process owner only
pub fn write_private(path: &Path, pem: &str) -> Result<(), CertificateError> {
    write_pem(path, pem, 0o600)
}

/// Read a PEM file into a string
pub fn read_pem(path: &Path) -> Result<String, CertificateError> {
    fs::read_to_string(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_pem(path: &Path, pem: &str, mode: u32) -> Result<(), CertificateError> {
    let write_err = |source| CertificateError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(write_err)?;
    file.write_all(pem.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    // `mode` only applies on creation; tighten a pre-existing file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(write_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
