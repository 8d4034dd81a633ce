use std::path::Path;

use figment::{
    providers::{Format, Json, Yaml},
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A file-backed provider whose contents are read once, up front.
///
/// `figment`'s own file providers treat a missing file as empty configuration. We want a missing or unreadable file to
/// be an error the caller can decide to ignore, so the file is read eagerly and parsed into an owned snapshot.
pub struct FileProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl FileProvider {
    pub fn yaml<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::read::<Yaml, _>("YAML file", path)
    }

    pub fn json<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::read::<Json, _>("JSON file", path)
    }

    fn read<F: Format, P: AsRef<Path>>(kind: &'static str, path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::from(format!("failed to read '{}': {}", path.display(), e)))?;
        let data = F::string(&contents).data()?;

        Ok(Self {
            data,
            metadata: Metadata::from(kind, path),
        })
    }
}

impl Provider for FileProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
