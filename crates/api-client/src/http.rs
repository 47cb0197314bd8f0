use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use prescriptions::{
    Error, PrescriptionFile, PrescriptionPage, PrescriptionService, PrescriptionStats,
    PrescriptionStatus, ProgressCallback, UploadMetadata,
};
use reqwest::{
    multipart::{Form, Part},
    Method, RequestBuilder, Response, StatusCode, Url,
};
use serde::Deserialize;
use ulid::Ulid;

use crate::config::ClientConfig;

const USER_AGENT: &str = concat!("prescription-client/", env!("CARGO_PKG_VERSION"));

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Size of each slice of the file handed to the transport.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

pub struct HttpPrescriptionService {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpPrescriptionService {
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        let base_url = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| Error::Validation {
                message: format!("Invalid API base URL {}", config.base_url),
            })?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Base URL extended with `segments`, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.endpoint(segments);
        let request_id = Ulid::new().to_string();
        tracing::debug!("{} {} (request {})", method, url, request_id);

        let builder = self
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id);

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, Error> {
        let response = builder.send().await.map_err(transport)?;
        ensure_success(response).await
    }
}

#[async_trait]
impl PrescriptionService for HttpPrescriptionService {
    async fn upload_prescription(
        &self,
        file: PrescriptionFile,
        metadata: UploadMetadata,
        on_progress: ProgressCallback,
    ) -> Result<(), Error> {
        let size = file.size();
        let body = progress_body(file.bytes, on_progress.clone());

        let part = Part::stream_with_length(body, size)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|e| Error::Validation {
                message: format!("Invalid content type {}: {}", file.content_type, e),
            })?;

        let mut form = Form::new().part("file", part);
        if let Some(notes) = metadata.patient_notes {
            form = form.text("patientNotes", notes);
        }
        if let Some(doctor) = metadata.doctor_name {
            form = form.text("doctorName", doctor);
        }
        if let Some(date) = metadata.prescription_date {
            form = form.text("prescriptionDate", date.to_string());
        }

        self.send(
            self.request(Method::POST, &["prescriptions", "upload"])
                .multipart(form),
        )
        .await?;

        on_progress(100);
        Ok(())
    }

    async fn get_prescriptions(
        &self,
        page: u32,
        page_size: u32,
        status: Option<PrescriptionStatus>,
    ) -> Result<PrescriptionPage, Error> {
        let mut query = vec![("page", page.to_string()), ("pageSize", page_size.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        self.send(self.request(Method::GET, &["prescriptions"]).query(&query))
            .await?
            .json::<PrescriptionPage>()
            .await
            .map_err(transport)
    }

    async fn get_prescription_stats(&self) -> Result<PrescriptionStats, Error> {
        self.send(self.request(Method::GET, &["prescriptions", "stats"]))
            .await?
            .json::<PrescriptionStats>()
            .await
            .map_err(transport)
    }

    async fn delete_prescription(&self, id: &str) -> Result<(), Error> {
        let response = self
            .request(Method::DELETE, &["prescriptions", id])
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                entity: format!("Prescription {}", id),
            });
        }

        ensure_success(response).await?;
        Ok(())
    }
}

fn progress_body(bytes: Vec<u8>, on_progress: ProgressCallback) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_chunks(Bytes::from(bytes), on_progress))
}

/// Slices of `buffer` in upload order, reporting the share handed to the
/// transport as each one is pulled.
fn progress_chunks(
    buffer: Bytes,
    on_progress: ProgressCallback,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    let total = buffer.len();
    stream::iter((0..total).step_by(UPLOAD_CHUNK_SIZE)).map(move |start| {
        let end = total.min(start + UPLOAD_CHUNK_SIZE);
        on_progress(percent(end as u64, total as u64));
        Ok(buffer.slice(start..end))
    })
}

fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (sent.min(total) * 100 / total) as u8
}

async fn ensure_success(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .unwrap_or_default();

    tracing::debug!("Backend answered {}: {}", status, message);
    Err(Error::Remote { message })
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn percent_is_floored_and_capped() {
        assert_eq!(percent(0, 1000), 0);
        assert_eq!(percent(333, 1000), 33);
        assert_eq!(percent(1000, 1000), 100);
        assert_eq!(percent(2000, 1000), 100);
    }

    #[test]
    fn percent_handles_files_beyond_four_gigabytes() {
        assert_eq!(percent(3_000_000_000, 6_000_000_000), 50);
    }

    #[test]
    fn empty_file_is_complete() {
        assert_eq!(percent(0, 0), 100);
    }

    #[tokio::test]
    async fn chunks_are_slices_of_one_buffer() {
        let buffer = Bytes::from(vec![3u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let on_progress: ProgressCallback =
            Arc::new(move |percent: u8| sink.lock().unwrap().push(percent));

        let chunks: Vec<Bytes> = progress_chunks(buffer.clone(), on_progress)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let lengths: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, vec![UPLOAD_CHUNK_SIZE, UPLOAD_CHUNK_SIZE, 10]);
        assert_eq!(chunks[1].as_ptr(), buffer[UPLOAD_CHUNK_SIZE..].as_ptr());
        assert_eq!(*ticks.lock().unwrap(), vec![49, 99, 100]);
    }

    fn service(base_url: &str) -> HttpPrescriptionService {
        HttpPrescriptionService::new(&ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        assert_eq!(
            service("http://pharmacy.local/api/")
                .endpoint(&["prescriptions", "stats"])
                .as_str(),
            "http://pharmacy.local/api/prescriptions/stats"
        );
        assert_eq!(
            service("http://pharmacy.local")
                .endpoint(&["prescriptions"])
                .as_str(),
            "http://pharmacy.local/prescriptions"
        );
    }

    #[test]
    fn ids_are_encoded_as_one_path_segment() {
        assert_eq!(
            service("http://pharmacy.local/api")
                .endpoint(&["prescriptions", "rx/1?force=true#top"])
                .as_str(),
            "http://pharmacy.local/api/prescriptions/rx%2F1%3Fforce=true%23top"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        for base_url in ["pharmacy.local/api", "mailto:pharmacist@pharmacy.local"] {
            let result = HttpPrescriptionService::new(&ClientConfig {
                base_url: base_url.to_string(),
                ..Default::default()
            });
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
    }
}
