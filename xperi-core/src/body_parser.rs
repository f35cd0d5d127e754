// Request body decoding, run before the handler chain
//
// The decoder switches on the media type of `Content-Type`:
//   application/json (and `+json`)     -> req.body()
//   application/xml, text/xml          -> req.body() in xml2js layout
//   multipart/form-data                -> req.files(), req.fields()
//   application/x-www-form-urlencoded  -> req.body() as an object of strings
// Anything else leaves the body as `Null`; `req.raw_body()` always holds
// the bytes.

use crate::logging::{debug, trace, warn};
use crate::options::UploadOptions;
use crate::{Error, Request, UploadErrorKind};
use bytes::Bytes;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A file received in a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the file was sent under.
    pub field: String,
    /// File name as sent by the client.
    pub original_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    /// Contents, when no upload directory is configured.
    pub data: Option<Bytes>,
    /// Location on disk, when an upload directory is configured.
    pub path: Option<PathBuf>,
}

impl UploadedFile {
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.original_name)
            .extension()
            .and_then(|ext| ext.to_str())
    }
}

/// Decode the body of `req` according to its content type.
pub async fn decode(req: &Request, upload: &UploadOptions) -> Result<(), Error> {
    let Some(media_type) = req.media_type() else {
        return Ok(());
    };
    let raw = req.raw_body();
    trace!(media_type = %media_type, bytes = raw.len(), "Decoding request body");

    match media_type.as_str() {
        "application/json" => req.set_body(parse_json(&raw)?),
        t if t.ends_with("+json") => req.set_body(parse_json(&raw)?),
        "application/xml" | "text/xml" => req.set_body(parse_xml(&raw)?),
        "application/x-www-form-urlencoded" => req.set_body(parse_urlencoded(&raw)?),
        "multipart/form-data" => {
            let content_type = req.content_type().unwrap_or_default();
            let (files, fields) = parse_multipart(content_type, raw, upload).await?;
            req.set_form(files, fields);
        }
        _ => {}
    }
    Ok(())
}

pub fn parse_json(raw: &[u8]) -> Result<Value, Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw).map_err(|e| Error::InvalidJson(e.to_string()))
}

pub fn parse_urlencoded(raw: &[u8]) -> Result<Value, Error> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw)
        .map_err(|e| Error::status(400, format!("Invalid form body: {e}")))?;
    Ok(Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    ))
}

#[derive(Default)]
struct XmlNode {
    name: String,
    attrs: Map<String, Value>,
    children: Vec<(String, Value)>,
    text: String,
}

impl XmlNode {
    fn open(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Self, Error> {
        let mut node = XmlNode {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::InvalidXml(e.to_string()))?;
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| Error::InvalidXml(e.to_string()))?;
            node.attrs.insert(
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                Value::String(value.into_owned()),
            );
        }
        Ok(node)
    }

    fn close(self) -> (String, Value) {
        let has_text = !self.text.trim().is_empty();
        if self.attrs.is_empty() && self.children.is_empty() {
            let text = if has_text { self.text } else { String::new() };
            return (self.name, Value::String(text));
        }

        let mut object = Map::new();
        if !self.attrs.is_empty() {
            object.insert("$".to_string(), Value::Object(self.attrs));
        }
        if has_text {
            object.insert("_".to_string(), Value::String(self.text));
        }
        for (name, value) in self.children {
            match object
                .entry(name)
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(items) => items.push(value),
                other => *other = Value::Array(vec![value]),
            }
        }
        (self.name, Value::Object(object))
    }
}

/// Convert an XML document into JSON: the root element becomes the single
/// key, child elements are grouped into arrays by name, attributes go under
/// `"$"` and text under `"_"` when the element also has attributes or
/// children.
pub fn parse_xml(raw: &[u8]) -> Result<Value, Error> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::InvalidXml(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::InvalidXml(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(Error::InvalidXml("multiple root elements".into()));
                }
                stack.push(XmlNode::open(&start, &reader)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(Error::InvalidXml("multiple root elements".into()));
                }
                let node = XmlNode::open(&start, &reader)?;
                attach(&mut stack, &mut root, node.close());
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| Error::InvalidXml("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, node.close());
            }
            Event::Text(content) => {
                let decoded = content
                    .decode()
                    .map_err(|e| Error::InvalidXml(e.to_string()))?;
                push_text(&mut stack, &decoded)?;
            }
            Event::CData(content) => {
                let decoded = content
                    .decode()
                    .map_err(|e| Error::InvalidXml(e.to_string()))?;
                push_text(&mut stack, &decoded)?;
            }
            Event::GeneralRef(reference) => {
                let resolved = match reference
                    .resolve_char_ref()
                    .map_err(|e| Error::InvalidXml(e.to_string()))?
                {
                    Some(ch) => ch.to_string(),
                    None => {
                        let name = reference
                            .decode()
                            .map_err(|e| Error::InvalidXml(e.to_string()))?;
                        quick_xml::escape::resolve_predefined_entity(&name)
                            .ok_or_else(|| Error::InvalidXml(format!("unknown entity &{name};")))?
                            .to_string()
                    }
                };
                push_text(&mut stack, &resolved)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::InvalidXml("unclosed element".into()));
    }
    let (name, value) = root.ok_or_else(|| Error::InvalidXml("no root element".into()))?;
    let mut document = Map::new();
    document.insert(name, value);
    Ok(Value::Object(document))
}

fn attach(stack: &mut [XmlNode], root: &mut Option<(String, Value)>, closed: (String, Value)) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(closed),
        None => *root = Some(closed),
    }
}

fn push_text(stack: &mut [XmlNode], text: &str) -> Result<(), Error> {
    match stack.last_mut() {
        Some(node) => {
            node.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::InvalidXml("text outside of root element".into())),
    }
}

/// Split a multipart body into files and text fields, applying `upload`.
pub async fn parse_multipart(
    content_type: &str,
    body: Bytes,
    upload: &UploadOptions,
) -> Result<(HashMap<String, Vec<UploadedFile>>, HashMap<String, String>), Error> {
    let boundary =
        multer::parse_boundary(content_type).map_err(|e| Error::Multipart(e.to_string()))?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    // Files are only stored once every part passed the rules, so a rejected
    // request leaves nothing behind in the upload directory.
    let mut accepted: Vec<(UploadedFile, Bytes)> = Vec::new();
    let mut fields = HashMap::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        let Some(original_name) = field.file_name().map(str::to_string) else {
            if upload.max_fields.is_some_and(|max| fields.len() >= max) {
                return Err(Error::upload(
                    UploadErrorKind::MaxFields,
                    format!("more than {} fields", fields.len()),
                ));
            }
            let value = field
                .text()
                .await
                .map_err(|e| Error::Multipart(e.to_string()))?;
            fields.insert(name, value);
            continue;
        };

        if !upload.accepts_field(&name) {
            debug!(field = %name, "Discarding file from field not configured for uploads");
            continue;
        }

        let content_type = field.content_type().map(|mime| mime.to_string());
        let mut data = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::Multipart(e.to_string()))?
        {
            data.extend_from_slice(&chunk);
            if upload
                .max_file_size
                .is_some_and(|max| data.len() as u64 > max)
            {
                return Err(Error::upload(
                    UploadErrorKind::MaxFileSize,
                    format!("{original_name} exceeds the maximum file size"),
                ));
            }
        }

        let file = UploadedFile {
            field: name,
            original_name,
            content_type,
            size: data.len() as u64,
            data: None,
            path: None,
        };
        if !upload.accepts_extension(file.extension()) {
            return Err(Error::upload(
                UploadErrorKind::AllowExtensions,
                format!("{} has an extension that is not allowed", file.original_name),
            ));
        }
        accepted.push((file, Bytes::from(data)));
    }

    let mut files: HashMap<String, Vec<UploadedFile>> = HashMap::new();
    let mut stored = Vec::new();
    for (mut file, data) in accepted {
        match &upload.upload_dir {
            Some(dir) => match store(dir, &file, &data, upload.keep_extensions).await {
                Ok(path) => {
                    stored.push(path.clone());
                    file.path = Some(path);
                }
                Err(err) => {
                    remove_stored(&stored).await;
                    return Err(err);
                }
            },
            None => file.data = Some(data),
        }
        files.entry(file.field.clone()).or_default().push(file);
    }

    Ok((files, fields))
}

async fn remove_stored(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %err, "Failed to remove stored upload");
        }
    }
}

async fn store(
    dir: &Path,
    file: &UploadedFile,
    data: &[u8],
    keep_extension: bool,
) -> Result<PathBuf, Error> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let stored_name = match file.extension() {
        Some(ext) if keep_extension => format!("{id}.{ext}"),
        _ => id,
    };
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(stored_name);
    tokio::fs::write(&path, data).await?;
    debug!(path = %path.display(), size = file.size, "Stored uploaded file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpRequest;
    use serde_json::json;

    const BOUNDARY: &str = "XPERIBOUNDARY";

    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request {
        Request::from_http(
            HttpRequest::new("POST", "/upload")
                .with_header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .with_body(multipart_body(parts)),
        )
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_json(b"  ").unwrap(), Value::Null);
        assert!(matches!(parse_json(b"{oops"), Err(Error::InvalidJson(_))));
    }

    #[test]
    fn test_parse_urlencoded() {
        let body = parse_urlencoded(b"name=Ana+Maria&age=30").unwrap();
        assert_eq!(body, json!({"name": "Ana Maria", "age": "30"}));
    }

    #[test]
    fn test_parse_xml_layout() {
        let xml = br#"<?xml version="1.0"?>
            <order id="7">
                <item sku="a1">Pen</item>
                <item>Ink &amp; paper</item>
                <note/>
            </order>"#;
        let body = parse_xml(xml).unwrap();
        assert_eq!(
            body,
            json!({
                "order": {
                    "$": {"id": "7"},
                    "item": [
                        {"$": {"sku": "a1"}, "_": "Pen"},
                        "Ink & paper"
                    ],
                    "note": [""]
                }
            })
        );
    }

    #[test]
    fn test_parse_xml_text_root() {
        assert_eq!(parse_xml(b"<name>xperi</name>").unwrap(), json!({"name": "xperi"}));
        assert_eq!(parse_xml(b"").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_xml_rejects_malformed() {
        assert!(matches!(parse_xml(b"<a><b></a>"), Err(Error::InvalidXml(_))));
        assert!(matches!(parse_xml(b"<a>"), Err(Error::InvalidXml(_))));
        assert!(matches!(parse_xml(b"<a/><b/>"), Err(Error::InvalidXml(_))));
    }

    #[tokio::test]
    async fn test_decode_json_request() {
        let req = Request::from_http(
            HttpRequest::new("POST", "/")
                .with_header("Content-Type", "application/json; charset=utf-8")
                .with_body(r#"{"user":"ana"}"#),
        );
        decode(&req, &UploadOptions::default()).await.unwrap();
        assert_eq!(req.body(), json!({"user": "ana"}));
    }

    #[tokio::test]
    async fn test_decode_unknown_type_leaves_null() {
        let req = Request::from_http(
            HttpRequest::new("POST", "/")
                .with_header("Content-Type", "application/octet-stream")
                .with_body(vec![0u8, 1, 2]),
        );
        decode(&req, &UploadOptions::default()).await.unwrap();
        assert_eq!(req.body(), Value::Null);
        assert_eq!(req.raw_body().len(), 3);
    }

    #[tokio::test]
    async fn test_multipart_in_memory() {
        let req = multipart_request(&[
            ("title", None, "holiday"),
            ("photo", Some("beach.png"), "PNGDATA"),
        ]);
        decode(&req, &UploadOptions::default()).await.unwrap();

        assert_eq!(req.field("title").as_deref(), Some("holiday"));
        let photo = req.file("photo").unwrap();
        assert_eq!(photo.original_name, "beach.png");
        assert_eq!(photo.size, 7);
        assert_eq!(photo.data.as_deref(), Some(&b"PNGDATA"[..]));
        assert!(photo.path.is_none());
    }

    #[tokio::test]
    async fn test_multipart_written_to_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadOptions::default().upload_dir(dir.path());
        let req = multipart_request(&[("doc", Some("report.pdf"), "%PDF")]);
        decode(&req, &upload).await.unwrap();

        let doc = req.file("doc").unwrap();
        let path = doc.path.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_rejected_multipart_leaves_upload_dir_empty() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadOptions::default()
            .upload_dir(dir.path())
            .allow_extensions(["png"]);
        let req = multipart_request(&[
            ("first", Some("ok.png"), "PNG"),
            ("second", Some("bad.exe"), "MZ"),
        ]);
        let err = decode(&req, &upload).await.unwrap_err();
        assert!(matches!(err, Error::Upload { kind: UploadErrorKind::AllowExtensions, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(req.files().is_empty());

        let upload = UploadOptions::default().upload_dir(dir.path()).max_fields(1);
        let req = multipart_request(&[
            ("photo", Some("ok.png"), "PNG"),
            ("a", None, "1"),
            ("b", None, "2"),
        ]);
        let err = decode(&req, &upload).await.unwrap_err();
        assert!(matches!(err, Error::Upload { kind: UploadErrorKind::MaxFields, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_multipart_rules() {
        let upload = UploadOptions::default().allow_extensions(["png"]);
        let req = multipart_request(&[("photo", Some("virus.exe"), "MZ")]);
        let err = decode(&req, &upload).await.unwrap_err();
        assert!(matches!(err, Error::Upload { kind: UploadErrorKind::AllowExtensions, .. }));

        let upload = UploadOptions::default().max_file_size(3);
        let req = multipart_request(&[("photo", Some("big.png"), "0123456789")]);
        let err = decode(&req, &upload).await.unwrap_err();
        assert!(matches!(err, Error::Upload { kind: UploadErrorKind::MaxFileSize, .. }));

        let upload = UploadOptions::default().max_fields(1);
        let req = multipart_request(&[("a", None, "1"), ("b", None, "2")]);
        let err = decode(&req, &upload).await.unwrap_err();
        assert!(matches!(err, Error::Upload { kind: UploadErrorKind::MaxFields, .. }));
    }

    #[tokio::test]
    async fn test_multipart_discards_unlisted_file_fields() {
        let upload = UploadOptions::default().file_fields(["avatar"]);
        let req = multipart_request(&[
            ("avatar", Some("me.png"), "A"),
            ("other", Some("x.png"), "B"),
        ]);
        decode(&req, &upload).await.unwrap();
        let files = req.files();
        assert!(files.contains_key("avatar"));
        assert!(!files.contains_key("other"));
    }
}
