use crate::{
    classifier::Classifier,
    config::Config,
    routes::{
        health::healthcheck, home::home, predict::predict, static_files::static_file,
    },
    spool::TempSpool,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub classifier: Arc<dyn Classifier>,
    pub spool: Arc<TempSpool>,
    pub index_html: Arc<String>,
    pub static_dir: PathBuf,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        classifier: Arc<dyn Classifier>,
        spool: Arc<TempSpool>,
        index_html: String,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let app_state = SharedState {
            classifier,
            spool,
            index_html: Arc::new(index_html),
            static_dir: config.assets.static_dir.clone(),
        };

        let router = api_router(app_state, config.upload.max_body_bytes);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

// Both spellings of the prediction route are registered; existing clients
// post to the trailing-slash form.
pub fn api_router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/static/{*path}", get(static_file))
        .route("/predict", post(predict))
        .route("/predict/", post(predict))
        .route("/health", get(healthcheck))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, Prediction};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use image::{ImageBuffer, Rgb};
    use ndarray::{Array, Ix4};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct MockClassifier;

    impl Classifier for MockClassifier {
        fn classify(&self, input: &Array<f32, Ix4>) -> Result<Prediction, ClassifierError> {
            assert_eq!(input.shape(), &[1, 150, 150, 3]);
            Ok(Prediction {
                label: "Healthy".to_string(),
                confidence: 0.91,
            })
        }
    }

    struct TestServer {
        router: Router,
        spool_dir: TempDir,
        _static_dir: TempDir,
    }

    fn test_server() -> TestServer {
        let spool_dir = tempfile::tempdir().unwrap();
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("styles.css"), "body { margin: 0 }").unwrap();

        let state = SharedState {
            classifier: Arc::new(MockClassifier),
            spool: Arc::new(TempSpool::new(spool_dir.path().to_path_buf()).unwrap()),
            index_html: Arc::new(
                "<html><body>Plant disease classifier</body></html>".to_string(),
            ),
            static_dir: static_dir.path().to_path_buf(),
        };

        TestServer {
            router: api_router(state, 1024 * 1024),
            spool_dir,
            _static_dir: static_dir,
        }
    }

    fn png_upload() -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 24, Rgb([20, 180, 20]));
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();

        data
    }

    const BOUNDARY: &str = "plant-test-boundary";

    fn multipart_request(uri: &str, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{field}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_predict_returns_filename_and_label() {
        let server = test_server();

        let request = multipart_request("/predict", "file", "leaf.png", &png_upload());
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["filename"], "leaf.png");
        assert_eq!(body["prediction"], "Healthy");
    }

    #[tokio::test]
    async fn test_predict_accepts_trailing_slash() {
        let server = test_server();

        let request = multipart_request("/predict/", "file", "leaf.png", &png_upload());
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_is_deterministic() {
        let server = test_server();
        let upload = png_upload();

        let first = server
            .router
            .clone()
            .oneshot(multipart_request("/predict", "file", "leaf.png", &upload))
            .await
            .unwrap();
        let second = server
            .router
            .clone()
            .oneshot(multipart_request("/predict", "file", "leaf.png", &upload))
            .await
            .unwrap();

        assert_eq!(json_body(first).await, json_body(second).await);
    }

    #[tokio::test]
    async fn test_non_image_upload_is_reported_not_fatal() {
        let server = test_server();

        let request = multipart_request("/predict", "file", "notes.txt", b"plain text");
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["error"].is_string());

        // The server keeps serving after a failed request.
        let request = multipart_request("/predict", "file", "leaf.png", &png_upload());
        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_file_field_is_a_bad_request() {
        let server = test_server();

        let request = multipart_request("/predict", "picture", "leaf.png", &png_upload());
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_empty_upload_is_a_bad_request() {
        let server = test_server();

        let request = multipart_request("/predict", "file", "empty.png", b"");
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_spool_is_emptied_after_request() {
        let server = test_server();

        let request = multipart_request("/predict", "file", "leaf.png", &png_upload());
        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let leftover = std::fs::read_dir(server.spool_dir.path()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_home_serves_html() {
        let server = test_server();

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!bytes.is_empty());
        assert!(std::str::from_utf8(&bytes).unwrap().contains("<html"));
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let server = test_server();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_static_file_is_served() {
        let server = test_server();

        let request = Request::builder()
            .uri("/static/styles.css")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/css"
        );
    }

    #[tokio::test]
    async fn test_missing_static_file_is_not_found() {
        let server = test_server();

        let request = Request::builder()
            .uri("/static/missing.css")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_traversal_is_rejected() {
        let server = test_server();

        let request = Request::builder()
            .uri("/static/..%2F..%2FCargo.toml")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
