use std::io::Cursor;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::recognition::domain::face_recognizer::{
    FaceRecognizer, RecognitionError, RecognitionOutcome,
};
use crate::shared::frame::Frame;

/// Remote identification service reached over HTTP.
///
/// Each crop is POSTed as `image/jpeg`; the service answers with
/// `{"personId": ..., "name": ..., "confidence": ...}`, or with an empty
/// body, `null`, or 204 when nobody matches.
pub struct HttpFaceRecognizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpFaceRecognizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RecognitionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecognitionError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            timeout,
        })
    }

    /// Sends `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl FaceRecognizer for HttpFaceRecognizer {
    fn recognize(&self, face: &Frame) -> Result<Option<RecognitionOutcome>, RecognitionError> {
        let jpeg = encode_jpeg(face)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(jpeg);
        if let Some(ref key) = self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                RecognitionError::Timeout(self.timeout)
            } else {
                RecognitionError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RecognitionError::Http(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .map_err(|e| RecognitionError::Http(e.to_string()))?;
        parse_response(&body)
    }
}

fn encode_jpeg(face: &Frame) -> Result<Vec<u8>, RecognitionError> {
    let img = face
        .to_rgb_image()
        .ok_or_else(|| RecognitionError::Backend("face crop is not RGB".to_string()))?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Jpeg)
        .map_err(|e| RecognitionError::Backend(format!("JPEG encode failed: {e}")))?;
    Ok(buf.into_inner())
}

fn parse_response(body: &str) -> Result<Option<RecognitionOutcome>, RecognitionError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<RecognitionOutcome>>(body)
        .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::face_recognizer::PersonId;
    use approx::assert_relative_eq;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// Serves exactly one HTTP response and returns the base URL plus a
    /// handle yielding the received request body.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, std::thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/recognize", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut received = vec![0u8; content_length];
            reader.read_exact(&mut received).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            received
        });
        (url, handle)
    }

    fn face() -> Frame {
        Frame::new(vec![120u8; 16 * 16 * 3], 16, 16, 3, 0)
    }

    #[test]
    fn test_parse_match() {
        let outcome = parse_response(r#"{"personId":"42","name":"Ada","confidence":0.93}"#)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.person_id, Some(PersonId::from("42")));
        assert_eq!(outcome.name.as_deref(), Some("Ada"));
        assert_relative_eq!(outcome.confidence, 0.93);
        assert!(outcome.is_match());
    }

    #[test]
    fn test_parse_numeric_person_id() {
        let outcome = parse_response(r#"{"personId":42,"name":"Ada","confidence":0.9}"#)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.person_id, Some(PersonId::Number(42)));
        assert!(outcome.is_match());
    }

    #[test]
    fn test_parse_zero_or_negative_person_id_is_not_a_match() {
        for body in [
            r#"{"personId":0,"name":"Nobody","confidence":0.1}"#,
            r#"{"personId":-1,"confidence":0.1}"#,
            r#"{"personId":"","confidence":0.1}"#,
        ] {
            let outcome = parse_response(body).unwrap().unwrap();
            assert!(!outcome.is_match(), "{body}");
        }
    }

    #[test]
    fn test_parse_empty_and_null_mean_no_match() {
        assert!(parse_response("").unwrap().is_none());
        assert!(parse_response("  null \n").unwrap().is_none());
    }

    #[test]
    fn test_parse_object_without_person_is_not_a_match() {
        let outcome = parse_response(r#"{"confidence":0.2}"#).unwrap().unwrap();
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        assert!(matches!(
            parse_response("<html>oops</html>"),
            Err(RecognitionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let jpeg = encode_jpeg(&face()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_recognize_posts_jpeg_and_parses_match() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"personId":"7","name":"Grace","confidence":0.88}"#,
        );
        let recognizer = HttpFaceRecognizer::new(url, Duration::from_secs(5)).unwrap();

        let outcome = recognizer.recognize(&face()).unwrap().unwrap();
        assert_eq!(outcome.name.as_deref(), Some("Grace"));

        let body = server.join().unwrap();
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_recognize_accepts_numeric_person_id() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"personId":7,"name":"Grace","confidence":0.88}"#,
        );
        let recognizer = HttpFaceRecognizer::new(url, Duration::from_secs(5)).unwrap();

        let outcome = recognizer.recognize(&face()).unwrap().unwrap();
        assert!(outcome.is_match());
        assert_eq!(outcome.person_id.unwrap().to_string(), "7");
        server.join().unwrap();
    }

    #[test]
    fn test_recognize_no_content_is_no_match() {
        let (url, server) = serve_once("HTTP/1.1 204 No Content", "");
        let recognizer = HttpFaceRecognizer::new(url, Duration::from_secs(5)).unwrap();
        assert!(recognizer.recognize(&face()).unwrap().is_none());
        server.join().unwrap();
    }

    #[test]
    fn test_recognize_server_error_is_http_error() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", "boom");
        let recognizer = HttpFaceRecognizer::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            recognizer.recognize(&face()),
            Err(RecognitionError::Http(_))
        ));
        server.join().unwrap();
    }
}
