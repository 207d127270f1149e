use std::time::Instant;

use axum::{
    extract::{rejection::FormRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Form,
};
use serde::Deserialize;

use crate::{auth, push, variant, AppState, Error};

/// Object-creation notification, as posted by the bucket's notification channel.
#[derive(Deserialize, Debug, Default)]
pub struct Notification {
    bucket: Option<String>,
    name: Option<String>,
    task: Option<String>,
}

impl Notification {
    fn object(&self) -> Result<(&str, &str), Error> {
        let bucket = present(self.bucket.as_deref()).ok_or(Error::MissingField("bucket"))?;
        let name = present(self.name.as_deref()).ok_or(Error::MissingField("name"))?;
        Ok((bucket, name))
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub async fn healthcheck() {}

#[instrument(skip_all)]
pub async fn notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<Notification>, FormRejection>,
) -> Result<StatusCode, Error> {
    // unreadable forms carry no usable fields
    let form = form.map_or_else(
        |rejection| {
            debug!(%rejection, "Unreadable notification form");
            Notification::default()
        },
        |Form(form)| form,
    );
    let (bucket, name) = form.object()?;

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match auth::authorized(&state, header).await {
        Ok(true) => {}
        Ok(false) => return Err(Error::Forbidden),
        Err(source) => {
            warn!(?source, "Failed to verify token");
            return Err(Error::Forbidden);
        }
    }

    let start = Instant::now();
    let processed = variant::generate(&state, bucket, name).await;
    info!(
        bucket,
        name,
        elapsed = ?start.elapsed(),
        ok = processed.is_ok(),
        "Processed notification"
    );
    processed?;

    let id = push::callback_id(name, form.task.as_deref().unwrap_or_default());
    state.notifier.notify(&id).await?;
    Ok(StatusCode::OK)
}
