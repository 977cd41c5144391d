//! HTTP object store client speaking plain bucket/key PUT and GET.

use std::path::Path;

use reqwest::header::{CONTENT_LENGTH, IF_NONE_MATCH};
use reqwest::{Body, Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;

use super::partial_path;
use crate::error::{Error, Result};
use crate::ports::object_store::{validate_location, ObjectStore, StoreFuture};

/// Access/secret pair generated once per orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key, sent as the basic-auth user.
    pub access_key: String,
    /// Secret key, sent as the basic-auth password.
    pub secret_key: String,
}

/// Object store reached over HTTP at `<base>/<bucket>/<key>`.
pub struct HttpObjectStore {
    client: Client,
    base: String,
    credentials: Credentials,
}

impl HttpObjectStore {
    /// Creates a client for the store at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        Self {
            client: Client::new(),
            base: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, bucket: &str, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}/{bucket}/{key}", self.base),
            None => format!("{}/{bucket}", self.base),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.credentials.access_key, Some(&self.credentials.secret_key))
    }
}

fn transport(action: &str, bucket: &str, key: &str, e: &reqwest::Error) -> Error {
    Error::Store { message: format!("{action} {bucket}/{key} failed: {e}") }
}

fn unexpected(action: &str, bucket: &str, key: &str, status: StatusCode) -> Error {
    Error::Store { message: format!("{action} {bucket}/{key} returned {}", status.as_u16()) }
}

impl ObjectStore for HttpObjectStore {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a> {
        Box::pin(async move {
            validate_location(bucket, "key")?;
            let response = self
                .request(reqwest::Method::PUT, &self.url(bucket, None))
                .send()
                .await
                .map_err(|e| transport("create bucket", bucket, "", &e))?;
            let status = response.status();
            // An existing bucket answers 409; that is success here.
            if status.is_success() || status == StatusCode::CONFLICT {
                Ok(())
            } else {
                Err(unexpected("create bucket", bucket, "", status))
            }
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        local: &'a Path,
        overwrite: bool,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            validate_location(bucket, key)?;
            let file = tokio::fs::File::open(local)
                .await
                .map_err(|e| Error::io(format!("open {}", local.display()), e))?;
            let size = file
                .metadata()
                .await
                .map_err(|e| Error::io(format!("stat {}", local.display()), e))?
                .len();
            let mut request = self
                .request(reqwest::Method::PUT, &self.url(bucket, Some(key)))
                .header(CONTENT_LENGTH, size);
            if !overwrite {
                request = request.header(IF_NONE_MATCH, "*");
            }
            tracing::debug!(bucket, key, bytes = size, "uploading object");
            let response = request
                .body(Body::from(file))
                .send()
                .await
                .map_err(|e| transport("put", bucket, key, &e))?;
            match response.status() {
                s if s.is_success() => Ok(()),
                StatusCode::PRECONDITION_FAILED => {
                    Err(Error::Conflict { bucket: bucket.into(), key: key.into() })
                }
                s => Err(unexpected("put", bucket, key, s)),
            }
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str, dest: &'a Path) -> StoreFuture<'a> {
        Box::pin(async move {
            validate_location(bucket, key)?;
            let mut response = self
                .request(reqwest::Method::GET, &self.url(bucket, Some(key)))
                .send()
                .await
                .map_err(|e| transport("get", bucket, key, &e))?;
            match response.status() {
                s if s.is_success() => {}
                StatusCode::NOT_FOUND => {
                    return Err(Error::NotFound { bucket: bucket.into(), key: key.into() });
                }
                s => return Err(unexpected("get", bucket, key, s)),
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io(format!("create {}", parent.display()), e))?;
            }
            let tmp = partial_path(dest);
            if let Err(e) = download(&mut response, &tmp, bucket, key).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
            tokio::fs::rename(&tmp, dest)
                .await
                .map_err(|e| Error::io(format!("rename into {}", dest.display()), e))
        })
    }
}

/// Streams the response body into `path` chunk by chunk.
async fn download(response: &mut Response, path: &Path, bucket: &str, key: &str) -> Result<()> {
    let write_err = |e| Error::io(format!("write {}", path.display()), e);
    let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
    while let Some(chunk) =
        response.chunk().await.map_err(|e| transport("get", bucket, key, &e))?
    {
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Answers one request with `status` and `body` on a background thread
    /// and returns what the client sent: the header block and the body.
    fn serve_once(status: &'static str, body: Vec<u8>) -> (String, JoinHandle<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line.trim_end().is_empty() {
                    break;
                }
                head.push_str(&line.to_ascii_lowercase());
            }
            let received = read_body(&mut reader, &head);
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(&body).unwrap();
            (head, received)
        });
        (url, handle)
    }

    fn read_body(reader: &mut impl BufRead, head: &str) -> Vec<u8> {
        let length = head.lines().find_map(|l| l.strip_prefix("content-length:"));
        if let Some(length) = length {
            let mut body = vec![0; length.trim().parse().unwrap()];
            reader.read_exact(&mut body).unwrap();
            return body;
        }
        if !head.contains("transfer-encoding: chunked") {
            return Vec::new();
        }
        let mut body = Vec::new();
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).unwrap();
            let size = usize::from_str_radix(size.trim(), 16).unwrap();
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).unwrap();
            if size == 0 {
                return body;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    fn image() -> Vec<u8> {
        (0..=255u8).cycle().take(3 * 1024 * 1024 + 17).collect()
    }

    fn creds() -> Credentials {
        Credentials { access_key: "a".into(), secret_key: "s".into() }
    }

    #[test]
    fn builds_bucket_and_key_urls() {
        let store = HttpObjectStore::new("http://10.0.0.5:9000/", creds());
        assert_eq!(store.url("builds", None), "http://10.0.0.5:9000/builds");
        assert_eq!(
            store.url("builds", Some("42/x86_64/meta.json")),
            "http://10.0.0.5:9000/builds/42/x86_64/meta.json"
        );
    }

    #[tokio::test]
    async fn rejects_escaping_key_before_any_request() {
        let store = HttpObjectStore::new("http://127.0.0.1:1", creds());
        let err = store.get("builds", "../x", Path::new("/tmp/never")).await.unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }

    #[tokio::test]
    async fn unreachable_store_is_a_store_error() {
        let store = HttpObjectStore::new("http://127.0.0.1:1", creds());
        let err = store.ensure_bucket("builds").await.unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }

    #[tokio::test]
    async fn put_streams_file_with_auth_and_no_overwrite_guard() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.qcow2");
        std::fs::write(&src, image()).unwrap();
        let (url, server) = serve_once("200 OK", Vec::new());

        let store = HttpObjectStore::new(&url, creds());
        store.put("builds", "1/x86_64/disk.qcow2", &src, false).await.unwrap();
        let (head, received) = server.join().unwrap();
        assert!(head.starts_with("put /builds/1/x86_64/disk.qcow2 "));
        assert!(head.contains("if-none-match: *"));
        assert!(head.contains("authorization: basic "));
        assert!(received == image());
    }

    #[tokio::test]
    async fn put_conflict_maps_to_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, "x").unwrap();
        let (url, server) = serve_once("412 Precondition Failed", Vec::new());
        let err = HttpObjectStore::new(&url, creds()).put("builds", "a", &src, false).await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn get_streams_into_destination_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/disk.qcow2");
        let (url, server) = serve_once("200 OK", image());

        HttpObjectStore::new(&url, creds()).get("builds", "disk.qcow2", &dest).await.unwrap();
        server.join().unwrap();
        assert!(std::fs::read(&dest).unwrap() == image());
        let names: Vec<_> = std::fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("meta.json");
        let (url, server) = serve_once("404 Not Found", Vec::new());
        let err = HttpObjectStore::new(&url, creds()).get("builds", "meta.json", &dest).await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!dest.exists());
    }
}
