use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

use reqwest::{Client, ClientBuilder};
use s3::{creds::Credentials, Region};

use crate::{
    auth::{GoogleTokenInfo, TokenVerifier},
    push::{CompletionNotifier, HttpNotifier, MetadataTokenSource},
    storage::{LocalStore, ObjectStore, S3Store},
    variant::{Encoding, OutputFormat, Variants},
};

const DEFAULT_VARIANTS: &str = "thumbnail=0x300,o=0x0";
const DEFAULT_TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/tokeninfo";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub notifier: Arc<dyn CompletionNotifier>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub output_bucket: String,
    pub bind_address: SocketAddr,
    pub variants: Variants,
    // written without a suffix
    pub primary_variant: String,
    pub output_format: OutputFormat,
    pub webp_quality: f32,
}

impl AppState {
    pub fn new() -> Self {
        let config = Config::from_env();
        let http = get_http();
        let tokeninfo_url = parse_var_or("TOKENINFO_URL", DEFAULT_TOKENINFO_URL.to_owned());
        let push_url = parse_var_or(
            "PUSH_URL",
            format!("https://{}.appspot.com/photopush", config.project_id),
        );
        let token_source = std::env::var("PUSH_USE_METADATA_TOKEN")
            .as_deref()
            .is_ok_and(crate::check_truthy)
            .then(|| MetadataTokenSource::new(http.clone()));
        Self {
            config: config.into(),
            store: get_store(),
            verifier: Arc::new(GoogleTokenInfo::new(http.clone(), tokeninfo_url)),
            notifier: Arc::new(HttpNotifier::new(http, push_url, token_source)),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            project_id: parse_var("PROJECT_ID"),
            output_bucket: parse_var("OUTPUT_BUCKET"),
            bind_address: parse_var_or("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 8080))),
            variants: parse_var_or("VARIANTS", Variants::from_str(DEFAULT_VARIANTS).unwrap()),
            primary_variant: parse_var_or("PRIMARY_VARIANT", "thumbnail".to_owned()),
            output_format: parse_var_or("OUTPUT_FORMAT", OutputFormat::default()),
            webp_quality: parse_var_or("WEBP_QUALITY", 75.0),
        }
    }

    pub const fn encoding(&self) -> Encoding {
        Encoding {
            format: self.output_format,
            webp_quality: self.webp_quality,
        }
    }
}

fn get_http() -> Client {
    ClientBuilder::new()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .unwrap()
}

fn get_store() -> Arc<dyn ObjectStore> {
    if let Ok(root) = std::env::var("STORAGE_DIR") {
        info!(%root, "Using local filesystem object store");
        return Arc::new(LocalStore::new(PathBuf::from(root)));
    }
    let region = match std::env::var("S3_ENDPOINT") {
        Ok(endpoint) => Region::Custom {
            region: parse_var_or("S3_REGION", "auto".to_owned()),
            endpoint,
        },
        Err(_) => parse_var("S3_REGION"),
    };
    let credentials = Credentials::from_env().expect("AWS credentials required in the environment");
    let path_style = std::env::var("S3_PATH_STYLE")
        .as_deref()
        .is_ok_and(crate::check_truthy);
    Arc::new(S3Store::new(region, credentials, path_style))
}

fn parse_var<T>(name: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    std::env::var(name)
        .unwrap_or_else(|_| panic!("{name} required in the environment"))
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
}

fn parse_var_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|source| {
            panic!(
                "{name} must be a valid {}: {source:?}",
                std::any::type_name::<T>()
            )
        }),
        Err(_) => default,
    }
}
