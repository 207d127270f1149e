use std::{
    collections::HashMap,
    io::{self, Cursor},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use oauth2::AccessToken;

use crate::{
    auth::{TokenInfo, TokenVerifier},
    push::CompletionNotifier,
    state::Config,
    storage::ObjectStore,
    AppState, Error,
};

pub const PROJECT_ID: &str = "abelana";

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let image = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 128]));
    let mut data = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
        .unwrap();
    data
}

#[derive(Debug, Clone)]
pub struct Written {
    pub bucket: String,
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    reads: Mutex<Vec<(String, String)>>,
    attempted: Mutex<Vec<String>>,
    writes: Mutex<Vec<Written>>,
    fail_on: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn insert(&self, bucket: &str, name: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), name.to_owned()), data);
    }

    pub fn object(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn fail_writes_to(&self, name: &str) {
        *self.fail_on.lock().unwrap() = Some(name.to_owned());
    }

    pub fn reads(&self) -> Vec<(String, String)> {
        self.reads.lock().unwrap().clone()
    }

    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Written> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error> {
        self.reads
            .lock()
            .unwrap()
            .push((bucket.to_owned(), name.to_owned()));
        self.object(bucket, name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_owned()).into())
    }

    async fn write(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Error> {
        self.attempted.lock().unwrap().push(name.to_owned());
        if self.fail_on.lock().unwrap().as_deref() == Some(name) {
            return Err(io::Error::other("write rejected").into());
        }
        self.insert(bucket, name, data.clone());
        self.writes.lock().unwrap().push(Written {
            bucket: bucket.to_owned(),
            name: name.to_owned(),
            data,
            content_type: content_type.to_owned(),
        });
        Ok(())
    }
}

/// Accepts `good`, knows `stranger` and `anonymous`, fails on `broken`.
#[derive(Default)]
pub struct FakeVerifier {
    calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &AccessToken) -> Result<TokenInfo, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let email = match token.secret().as_str() {
            "good" => Some(format!("{PROJECT_ID}@appspot.gserviceaccount.com")),
            "stranger" => Some("someone@example.com".to_owned()),
            "broken" => return Err(io::Error::other("tokeninfo unreachable").into()),
            _ => None,
        };
        Ok(TokenInfo { email })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    ids: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, id: &str) -> Result<(), Error> {
        self.ids.lock().unwrap().push(id.to_owned());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::PushStatus(reqwest::StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}

pub struct Fixture {
    pub config: Arc<Config>,
    pub store: Arc<MemoryStore>,
    pub verifier: Arc<FakeVerifier>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    /// Output goes to bucket `out`; the primary variant is named `primary`.
    pub fn new(variants: &str, format: &str) -> Self {
        let config = Config {
            project_id: PROJECT_ID.to_owned(),
            output_bucket: "out".to_owned(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            variants: variants.parse().unwrap(),
            primary_variant: "primary".to_owned(),
            output_format: format.parse().unwrap(),
            webp_quality: 75.0,
        };
        Self {
            config: config.into(),
            store: Arc::default(),
            verifier: Arc::default(),
            notifier: Arc::default(),
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            verifier: self.verifier.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
