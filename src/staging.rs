use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;

const MAX_NAME_ATTEMPTS: usize = 1000;

/// Working directory of a session.
///
/// `input/` holds intermediates rendered for the session, `output/` holds copies of the
/// user's files. Originals are never moved or modified.
pub struct Staging {
    root: PathBuf,
    created: Vec<PathBuf>,
}

impl Staging {
    /// Creates `input/` and `output/` under `root`. The root is made absolute so the paths
    /// handed to encoders do not depend on their working directory.
    pub async fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("input")).await?;
        tokio::fs::create_dir_all(root.join("output")).await?;
        Ok(Staging {
            root: tokio::fs::canonicalize(&root).await?,
            created: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Copies `source` into `output/` unless it already lives there.
    ///
    /// The copy never replaces an existing file: a name that is taken gets a numeric suffix.
    pub async fn stage(&mut self, source: &Path) -> io::Result<PathBuf> {
        let source_abs = tokio::fs::canonicalize(source).await?;
        let output_dir = self.output_dir();
        if source_abs.parent() == Some(output_dir.as_path()) {
            debug!("{} already staged", source_abs.display());
            return Ok(source_abs);
        }

        let mut reader = tokio::fs::File::open(&source_abs).await?;
        let (target, mut writer) = self.create_unique(&source_abs).await?;
        self.created.push(target.clone());
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;

        info!("staged {} as {}", source.display(), target.display());
        Ok(target)
    }

    async fn create_unique(&self, source: &Path) -> io::Result<(PathBuf, tokio::fs::File)> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a file", source.display()),
                )
            })?;
        let extension = source.extension().map(|e| e.to_string_lossy().into_owned());

        for n in 0..MAX_NAME_ATTEMPTS {
            let name = match (n, &extension) {
                (0, Some(ext)) => format!("{stem}.{ext}"),
                (0, None) => stem.clone(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let target = self.output_dir().join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(file) => return Ok((target, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {} in {}", source.display(), self.output_dir().display()),
        ))
    }

    /// Path for a file the session will generate in `input/`. It is removed on release.
    pub fn intermediate(&mut self, name: &str) -> PathBuf {
        let path = self.input_dir().join(name);
        if !self.created.contains(&path) {
            self.created.push(path.clone());
        }
        path
    }

    /// Removes every file this session created. Safe to call more than once.
    pub async fn release(&mut self) {
        for path in self.created.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("could not remove {}: {}", path.display(), err),
            }
        }
    }
}
