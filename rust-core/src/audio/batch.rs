//! Recording-set discovery and content addressing
//!
//! Expected layout under the batch root:
//!
//! ```text
//! env/      one or more .wav + exactly one reference .txt
//! R1000/    one .wav + optional reference .txt (bare `1000/` also accepted)
//! sweep/    one long .wav + optional reference .txt
//! ```

use crate::digest::sha256_hex;
use crate::error::{CalibError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_DIR: &str = "env";
pub const SWEEP_DIR: &str = "sweep";

#[derive(Debug, Clone, PartialEq)]
pub struct EnvFolder {
    pub dir: PathBuf,
    pub audio: Vec<PathBuf>,
    pub reference: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpmFolder {
    pub rpm: f64,
    pub dir: PathBuf,
    pub audio: PathBuf,
    pub reference: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepFolder {
    pub dir: PathBuf,
    pub audio: PathBuf,
    pub reference: Option<PathBuf>,
}

/// A scanned, content-addressed recording set
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBatch {
    pub root: PathBuf,
    pub env: EnvFolder,
    /// Sorted by ascending RPM
    pub rpms: Vec<RpmFolder>,
    pub sweep: Option<SweepFolder>,
    pub content_hash: String,
}

impl AudioBatch {
    /// Validate the folder structure and hash its contents
    pub fn scan(root: &Path) -> Result<Self> {
        let env_dir = root.join(ENV_DIR);
        if !env_dir.is_dir() {
            return Err(CalibError::MissingDir(env_dir));
        }
        let env = scan_env(&env_dir)?;

        let mut rpms = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(rpm) = path.file_name().and_then(|n| n.to_str()).and_then(parse_rpm_dir) else {
                continue;
            };
            let (audio, reference) = single_recording(&path)?;
            rpms.push(RpmFolder {
                rpm,
                dir: path,
                audio,
                reference,
            });
        }
        if rpms.is_empty() {
            return Err(CalibError::NoRpmNodes(root.to_path_buf()));
        }
        rpms.sort_by(|a, b| a.rpm.total_cmp(&b.rpm));
        if let Some(pair) = rpms.windows(2).find(|w| w[0].rpm == w[1].rpm) {
            return Err(CalibError::Ambiguous {
                dir: pair[1].dir.clone(),
                detail: format!("duplicate RPM {} (also {})", pair[1].rpm, pair[0].dir.display()),
            });
        }

        let sweep_dir = root.join(SWEEP_DIR);
        let sweep = if sweep_dir.is_dir() {
            let (audio, reference) = single_recording(&sweep_dir)?;
            Some(SweepFolder {
                dir: sweep_dir,
                audio,
                reference,
            })
        } else {
            None
        };

        let content_hash = content_hash(root)?;
        debug!(
            root = %root.display(),
            rpm_nodes = rpms.len(),
            has_sweep = sweep.is_some(),
            hash = %content_hash,
            "scanned audio batch"
        );

        Ok(Self {
            root: root.to_path_buf(),
            env,
            rpms,
            sweep,
            content_hash,
        })
    }

    /// The sweep folder, required for model building
    pub fn require_sweep(&self) -> Result<&SweepFolder> {
        self.sweep
            .as_ref()
            .ok_or_else(|| CalibError::MissingDir(self.root.join(SWEEP_DIR)))
    }
}

/// `R1000`, `r1500.5` or bare `1000`
pub fn parse_rpm_dir(name: &str) -> Option<f64> {
    let digits = name.strip_prefix(['R', 'r']).unwrap_or(name);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    digits.parse::<f64>().ok().filter(|rpm| *rpm > 0.0)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// (.wav files, .txt files) in a folder, sorted by name
fn list_recordings(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut wavs = Vec::new();
    let mut txts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, "wav") {
            wavs.push(path);
        } else if has_extension(&path, "txt") {
            txts.push(path);
        }
    }
    wavs.sort();
    txts.sort();
    Ok((wavs, txts))
}

fn scan_env(dir: &Path) -> Result<EnvFolder> {
    let (audio, mut txts) = list_recordings(dir)?;
    if audio.is_empty() || txts.is_empty() {
        return Err(CalibError::MissingPair(dir.to_path_buf()));
    }
    if txts.len() > 1 {
        return Err(CalibError::Ambiguous {
            dir: dir.to_path_buf(),
            detail: format!("{} reference files", txts.len()),
        });
    }
    Ok(EnvFolder {
        dir: dir.to_path_buf(),
        audio,
        reference: txts.remove(0),
    })
}

fn single_recording(dir: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
    let (mut wavs, mut txts) = list_recordings(dir)?;
    if wavs.is_empty() {
        return Err(CalibError::MissingPair(dir.to_path_buf()));
    }
    if wavs.len() > 1 || txts.len() > 1 {
        return Err(CalibError::Ambiguous {
            dir: dir.to_path_buf(),
            detail: format!("{} audio / {} reference files", wavs.len(), txts.len()),
        });
    }
    Ok((wavs.remove(0), txts.pop()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// SHA-256 over sorted `(relative path, size, content sha256)` tuples
pub fn content_hash(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;

    let mut tuples = Vec::with_capacity(files.len());
    for path in files {
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = fs::read(&path)?;
        tuples.push((rel, bytes.len(), sha256_hex(&bytes)));
    }
    tuples.sort();

    let manifest: String = tuples
        .iter()
        .map(|(rel, size, digest)| format!("{rel}\t{size}\t{digest}\n"))
        .collect();
    Ok(sha256_hex(manifest.as_bytes()))
}
