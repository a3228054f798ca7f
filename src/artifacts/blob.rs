// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Blob backends with a private and a public bucket

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

use crate::errors::ArtifactError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Originals; never addressable by clients
    Private,
    /// Served at `public_url(key)`
    Public,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, visibility: Visibility, key: &str, bytes: Bytes)
        -> Result<(), ArtifactError>;

    async fn get(&self, visibility: Visibility, key: &str) -> Result<Bytes, ArtifactError>;

    fn public_url(&self, key: &str) -> String;

    async fn copy(
        &self,
        from: (Visibility, &str),
        to: (Visibility, &str),
    ) -> Result<(), ArtifactError> {
        let bytes = self.get(from.0, from.1).await?;
        self.put(to.0, to.1, bytes).await
    }
}

/// Keys are generated internally, but still must stay inside the bucket
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let path = Path::new(key);
    let inside = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if inside {
        Ok(())
    } else {
        Err(ArtifactError::InvalidKey(key.to_string()))
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Two directory trees on local disk
pub struct FsBlobStore {
    private_root: PathBuf,
    public_root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(
        private_root: impl Into<PathBuf>,
        public_root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            private_root: private_root.into(),
            public_root: public_root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn path_for(&self, visibility: Visibility, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        let root = match visibility {
            Visibility::Private => &self.private_root,
            Visibility::Public => &self.public_root,
        };
        Ok(root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        visibility: Visibility,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), ArtifactError> {
        let path = self.path_for(visibility, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(())
    }

    async fn get(&self, visibility: Visibility, key: &str) -> Result<Bytes, ArtifactError> {
        let path = self.path_for(visibility, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }

    async fn copy(
        &self,
        from: (Visibility, &str),
        to: (Visibility, &str),
    ) -> Result<(), ArtifactError> {
        let source = self.path_for(from.0, from.1)?;
        let target = self.path_for(to.0, to.1)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&source, &target).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(from.1.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<(Visibility, String), Bytes>>,
    public_base_url: String,
}

impl InMemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            public_base_url: public_base_url.into(),
        }
    }

    pub async fn keys(&self, visibility: Visibility) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .await
            .keys()
            .filter(|(v, _)| *v == visibility)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        visibility: Visibility,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), ArtifactError> {
        validate_key(key)?;
        self.blobs
            .write()
            .await
            .insert((visibility, key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, visibility: Visibility, key: &str) -> Result<Bytes, ArtifactError> {
        self.blobs
            .read()
            .await
            .get(&(visibility, key.to_string()))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}
