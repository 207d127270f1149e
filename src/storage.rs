use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use s3::{creds::Credentials, Bucket, Region};

use crate::Error;

/// Blob storage addressed by bucket and object name.
///
/// Writes to distinct names may run concurrently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error>;

    async fn write(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Error>;
}

/// Any S3-compatible service, including GCS through its interoperability endpoint.
pub struct S3Store {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Store {
    pub const fn new(region: Region, credentials: Credentials, path_style: bool) -> Self {
        Self {
            region,
            credentials,
            path_style,
        }
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, Error> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        if self.path_style {
            return Ok(bucket.with_path_style());
        }
        Ok(bucket)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn read(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error> {
        let response = self.bucket(bucket)?.get_object(name).await?;
        debug!(size = response.bytes().len(), "Downloaded object");
        Ok(response.bytes().to_vec())
    }

    #[instrument(skip(self, data))]
    async fn write(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Error> {
        self.bucket(bucket)?
            .put_object_with_content_type(name, &data, content_type)
            .await?;
        Ok(())
    }
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, name: &str) -> io::Result<PathBuf> {
        let bucket = Path::new(bucket);
        let name = Path::new(name.trim_start_matches('/'));
        let contained = |p: &Path| {
            p.components().next().is_some()
                && p.components().all(|c| matches!(c, Component::Normal(_)))
        };
        if bucket.components().count() != 1 || !contained(bucket) || !contained(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object {} escapes the storage root", name.display()),
            ));
        }
        Ok(self.root.join(bucket).join(name))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn read(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error> {
        Ok(tokio::fs::read(self.path(bucket, name)?).await?)
    }

    async fn write(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), Error> {
        let path = self.path(bucket, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }
}
