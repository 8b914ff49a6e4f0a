//! Lossy compression of the merged PDF through Ghostscript.
//!
//! [`Compressor`] is a one-method capability so the real external tool and
//! test fakes are interchangeable. Compression is best-effort: the method
//! reports `false` instead of an error and the orchestrator decides what a
//! failure means for the request.
//!
//! Ghostscript cannot safely read and write the same file, so in-place
//! compression goes through a sibling temp file that replaces the input only
//! when the tool succeeded.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Default image resolution for downsampling.
pub const DEFAULT_IMAGE_RESOLUTION_DPI: u32 = 150;

/// Shrinks a PDF by downsampling its raster images.
pub trait Compressor: Send + Sync {
    /// Compress `input` into `output` (which may be the same path). Blocking.
    ///
    /// Returns `false` if the tool reported any error.
    fn compress(&self, input: &Path, output: &Path, image_resolution_dpi: u32) -> bool;
}

/// Runs the `gs` command-line tool with the `pdfwrite` device.
#[derive(Debug, Clone)]
pub struct GhostscriptCompressor {
    program: PathBuf,
}

impl Default for GhostscriptCompressor {
    fn default() -> Self {
        Self::new("gs")
    }
}

impl GhostscriptCompressor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one invocation, in Ghostscript's expected order.
    pub fn arguments(input: &Path, output: &Path, dpi: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-sDEVICE=pdfwrite",
            "-dNOPAUSE",
            "-dQUIET",
            "-dBATCH",
            "-dDetectDuplicateImages=true",
            "-dDownsampleColorImages=true",
            "-dDownsampleGrayImages=true",
            "-dDownsampleMonoImages=true",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push(format!("-dColorImageResolution={dpi}").into());
        args.push(format!("-dGrayImageResolution={dpi}").into());
        args.push(format!("-dMonoImageResolution={dpi}").into());

        let mut output_flag = OsString::from("-sOutputFile=");
        output_flag.push(output.as_os_str());
        args.push(output_flag);
        args.push(input.as_os_str().to_os_string());
        args
    }

    fn run(&self, input: &Path, output: &Path, dpi: u32) -> bool {
        let result = Command::new(&self.program)
            .args(Self::arguments(input, output, dpi))
            .stdin(Stdio::null())
            .output();

        match result {
            Ok(out) if out.status.success() && out.stderr.is_empty() => true,
            Ok(out) => {
                warn!(
                    "Ghostscript failed ({}): {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("Could not run '{}': {}", self.program.display(), e);
                false
            }
        }
    }
}

impl Compressor for GhostscriptCompressor {
    fn compress(&self, input: &Path, output: &Path, image_resolution_dpi: u32) -> bool {
        if input != output {
            return self.run(input, output, image_resolution_dpi);
        }

        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        let staging = match tempfile::Builder::new()
            .prefix("compressed-")
            .suffix(".pdf")
            .tempfile_in(dir)
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                warn!("Could not allocate compression output next to {}: {}", input.display(), e);
                return false;
            }
        };

        if !self.run(input, &staging, image_resolution_dpi) {
            return false;
        }

        match staging.persist(input) {
            Ok(()) => {
                debug!("Compressed {} in place", input.display());
                true
            }
            Err(e) => {
                warn!("Could not replace {}: {}", input.display(), e.error);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_carry_resolution_and_paths() {
        let args = GhostscriptCompressor::arguments(
            Path::new("/tmp/in.pdf"),
            Path::new("/tmp/out.pdf"),
            150,
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        assert_eq!(args[0], "-sDEVICE=pdfwrite");
        assert!(args.contains(&"-dDetectDuplicateImages=true".to_string()));
        assert!(args.contains(&"-dColorImageResolution=150".to_string()));
        assert!(args.contains(&"-dGrayImageResolution=150".to_string()));
        assert!(args.contains(&"-dMonoImageResolution=150".to_string()));
        assert_eq!(args[args.len() - 2], "-sOutputFile=/tmp/out.pdf");
        assert_eq!(args[args.len() - 1], "/tmp/in.pdf");
    }

    #[test]
    fn missing_binary_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();

        let compressor = GhostscriptCompressor::new("/nonexistent/gs-binary");
        assert!(!compressor.compress(&input, &input, DEFAULT_IMAGE_RESOLUTION_DPI));
        // The input is untouched and no staging file is left behind.
        assert_eq!(std::fs::read(&input).unwrap(), b"%PDF-1.4");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    /// A stand-in `gs` that writes a marker to its `-sOutputFile`, optionally
    /// chatting on stderr while still exiting 0.
    #[cfg(unix)]
    fn fake_gs(dir: &Path, stderr: Option<&str>) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("gs");
        let warn_line = stderr
            .map(|msg| format!("echo '{msg}' >&2\n"))
            .unwrap_or_default();
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 for arg in \"$@\"; do\n\
                 case \"$arg\" in -sOutputFile=*) out=\"${{arg#-sOutputFile=}}\" ;; esac\n\
                 done\n\
                 printf '%%PDFCOMPRESSED\\n' > \"$out\"\n\
                 {warn_line}exit 0\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn in_place_success_replaces_input() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("merged.pdf");
        std::fs::write(&input, b"%PDF-1.4 original").unwrap();

        let compressor = GhostscriptCompressor::new(fake_gs(bin.path(), None));
        assert!(compressor.compress(&input, &input, DEFAULT_IMAGE_RESOLUTION_DPI));

        assert_eq!(std::fs::read(&input).unwrap(), b"%PDFCOMPRESSED\n");
        // The staging file was renamed over the input.
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn stderr_output_fails_despite_zero_exit() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("merged.pdf");
        std::fs::write(&input, b"%PDF-1.4 original").unwrap();

        let script = fake_gs(bin.path(), Some("**** Error reading a content stream"));
        let compressor = GhostscriptCompressor::new(script);
        assert!(!compressor.compress(&input, &input, DEFAULT_IMAGE_RESOLUTION_DPI));

        assert_eq!(std::fs::read(&input).unwrap(), b"%PDF-1.4 original");
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 1);

        // Same rule for a separate output path.
        let output = work.path().join("out.pdf");
        assert!(!compressor.compress(&input, &output, DEFAULT_IMAGE_RESOLUTION_DPI));
    }
}
