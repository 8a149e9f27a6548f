//! Codecs for the types that are not plain shapes: text, raw buffers,
//! JSON documents, URLs, string dictionaries, and transferred files.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use bytes::Bytes;
use ipcwire_transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::bounds;
use crate::decoder::{Decode, Decoder};
use crate::encoder::{Encode, Encoder};
use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};

/// Read a guarded `u32` length and then exactly that many bytes.
fn decode_byte_vec<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Vec<u8>> {
    let length = decoder.decode_size::<u8>()?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(length)
        .map_err(|_| DecodeError::OutOfMemory { length })?;
    buf.resize(length, 0);
    decoder.decode_into(&mut buf)?;
    Ok(buf)
}

fn encode_byte_slice(encoder: &mut Encoder<'_>, bytes: &[u8]) -> EncodeResult<()> {
    encoder.encode_size(bytes.len())?;
    encoder.append(bytes);
    Ok(())
}

impl Decode for String {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let bytes = decode_byte_vec(decoder)?;
        String::from_utf8(bytes).map_err(|err| DecodeError::malformed("string", err.utf8_error()))
    }
}

impl Encode for str {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encode_byte_slice(encoder, self.as_bytes())
    }
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        self.as_str().encode(encoder)
    }
}

impl Decode for Bytes {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        decode_byte_vec(decoder).map(Bytes::from)
    }
}

impl Encode for Bytes {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encode_byte_slice(encoder, self)
    }
}

/// JSON documents travel as their text.
impl Decode for serde_json::Value {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let text: String = decoder.decode()?;
        serde_json::from_str(&text).map_err(|err| DecodeError::malformed("json document", err))
    }
}

impl Encode for serde_json::Value {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        let text = serde_json::to_string(self)?;
        encoder.encode(text.as_str())
    }
}

impl Decode for Url {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let text: String = decoder.decode()?;
        Url::parse(&text).map_err(|err| DecodeError::malformed("url", err))
    }
}

impl Encode for Url {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode(self.as_str())
    }
}

/// String-to-string attributes, kept sorted by key.
///
/// On the wire: a `u64` entry count, then that many key/value string pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dictionary(BTreeMap<String, String>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for Dictionary {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Decode for Dictionary {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let raw: u64 = decoder.decode()?;
        let count = bounds::check_length::<(String, String)>(raw, decoder.config())?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key: String = decoder.decode()?;
            let value: String = decoder.decode()?;
            map.insert(key, value);
        }
        Ok(Self(map))
    }
}

impl Encode for Dictionary {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        let count = u64::try_from(self.0.len()).map_err(|_| EncodeError::LengthOverflow {
            length: self.0.len(),
            width: 64,
        })?;
        encoder.encode(&count)?;
        for (key, value) in &self.0 {
            encoder.encode(key.as_str())?;
            encoder.encode(value.as_str())?;
        }
        Ok(())
    }
}

/// A file descriptor received from the peer.
///
/// Occupies no bytes in the stream: decoding takes the next handle from
/// the transport's side channel. The descriptor is checked to be open and
/// marked close-on-exec before the value is handed out.
#[derive(Debug)]
pub struct TransferredFile {
    fd: OwnedFd,
}

impl TransferredFile {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Give up ownership of the descriptor.
    pub fn take_fd(self) -> OwnedFd {
        self.fd
    }

    pub fn into_file(self) -> File {
        File::from(self.fd)
    }

    pub fn try_clone(&self) -> std::io::Result<Self> {
        self.fd.try_clone().map(Self::new)
    }
}

impl AsFd for TransferredFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TransferredFile {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<OwnedFd> for TransferredFile {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<File> for TransferredFile {
    fn from(file: File) -> Self {
        Self::new(file.into())
    }
}

impl From<TransferredFile> for OwnedFd {
    fn from(file: TransferredFile) -> Self {
        file.fd
    }
}

fn ensure_cloexec(fd: BorrowedFd<'_>) -> std::io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is borrowed from a live OwnedFd for the whole call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags == -1 {
        return Err(std::io::Error::last_os_error());
    }
    if flags & libc::FD_CLOEXEC == 0 {
        // SAFETY: as above; only the descriptor flags change.
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl Decode for TransferredFile {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let fd = decoder.take_handle()?;
        ensure_cloexec(fd.as_fd()).map_err(|err| {
            debug!(fd = fd.as_raw_fd(), error = %err, "rejected transferred handle");
            DecodeError::InvalidHandle(err.to_string())
        })?;
        Ok(Self::new(fd))
    }
}

impl Encode for TransferredFile {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.append_handle(self.fd.as_fd())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use ipcwire_transport::MemoryTransport;

    use super::*;
    use crate::config::DecoderConfig;
    use crate::decoder::decode;
    use crate::encoder::encode_message;

    fn prefixed(bytes: &[u8]) -> Vec<u8> {
        let mut wire = (bytes.len() as u32).to_ne_bytes().to_vec();
        wire.extend_from_slice(bytes);
        wire
    }

    #[test]
    fn string_fixture() {
        let mut transport = MemoryTransport::new(prefixed("héllo".as_bytes()));
        assert_eq!(decode::<String, _>(&mut transport).unwrap(), "héllo");
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut transport = MemoryTransport::new(prefixed(&[0x66, 0xFF, 0x6F]));
        let err = decode::<String, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { what: "string", .. }));
    }

    #[test]
    fn string_length_is_guarded_before_reading() {
        let mut transport = MemoryTransport::new(u32::MAX.to_ne_bytes().to_vec());
        let err = decode::<String, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::SizeLimitExceeded { .. }));
    }

    #[test]
    fn bytes_fixture() {
        let mut transport = MemoryTransport::new(prefixed(&[0, 1, 2, 0xFF]));
        let bytes: Bytes = decode(&mut transport).unwrap();
        assert_eq!(bytes.as_ref(), &[0, 1, 2, 0xFF]);
    }

    #[test]
    fn json_document_travels_as_text() {
        let mut transport = MemoryTransport::new(prefixed(br#"{"id":7,"tags":["a"]}"#));
        let value: serde_json::Value = decode(&mut transport).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["tags"][0], "a");
    }

    #[test]
    fn json_parse_failure_is_malformed() {
        let mut transport = MemoryTransport::new(prefixed(b"{not json"));
        let err = decode::<serde_json::Value, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { what: "json document", .. }));
    }

    #[test]
    fn url_round_trip_and_rejection() {
        let url = Url::parse("file:///tmp/socket?mode=ro").unwrap();
        let mut transport = encode_message(&url).unwrap().into_transport();
        assert_eq!(decode::<Url, _>(&mut transport).unwrap(), url);

        let mut transport = MemoryTransport::new(prefixed(b"not a url"));
        let err = decode::<Url, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { what: "url", .. }));
    }

    #[test]
    fn dictionary_uses_u64_count() {
        let mut wire = 2u64.to_ne_bytes().to_vec();
        for text in ["b", "2", "a", "1"] {
            wire.extend(prefixed(text.as_bytes()));
        }
        let mut transport = MemoryTransport::new(wire);
        let dict: Dictionary = decode(&mut transport).unwrap();

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("a"), Some("1"));
        let keys: Vec<&String> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn dictionary_count_is_guarded() {
        let config = DecoderConfig {
            max_length: 4,
            ..DecoderConfig::default()
        };
        let mut transport = MemoryTransport::new(5u64.to_ne_bytes().to_vec());
        let err = Decoder::with_config(&mut transport, config)
            .decode::<Dictionary>()
            .unwrap_err();
        assert!(matches!(err, DecodeError::SizeLimitExceeded { length: 5, .. }));
    }

    #[test]
    fn dictionary_serializes_as_plain_object() {
        let dict: Dictionary = [("lang", "en")].into_iter().collect();
        assert_eq!(serde_json::to_string(&dict).unwrap(), r#"{"lang":"en"}"#);
    }

    #[test]
    fn transferred_file_reads_no_bytes() {
        let mut file = tempfile();
        file.write_all(b"payload").unwrap();

        let mut transport = MemoryTransport::with_handles(vec![0xAAu8], [OwnedFd::from(file)]);
        let received: TransferredFile = decode(&mut transport).unwrap();
        assert_eq!(transport.remaining(), 1);

        let mut file = received.into_file();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "payload");
    }

    #[test]
    fn transferred_file_sets_cloexec() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let raw = file.as_raw_fd();
        // SAFETY: `file` stays open for the duration of these calls.
        unsafe {
            let flags = libc::fcntl(raw, libc::F_GETFD);
            assert_eq!(libc::fcntl(raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC), 0);
        }

        let mut transport = MemoryTransport::with_handles(Vec::new(), [OwnedFd::from(file)]);
        let received: TransferredFile = decode(&mut transport).unwrap();
        // SAFETY: `received` owns the descriptor.
        let flags = unsafe { libc::fcntl(received.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn transferred_file_without_handle() {
        let mut transport = MemoryTransport::new(Vec::new());
        let err = decode::<TransferredFile, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::MissingHandle));
    }

    #[test]
    fn encoding_duplicates_the_descriptor() {
        let file = TransferredFile::from(std::fs::File::open("/dev/null").unwrap());
        let message = encode_message(&file).unwrap();
        assert!(message.data.is_empty());
        assert_eq!(message.handles.len(), 1);
        assert_ne!(message.handles[0].as_raw_fd(), file.as_raw_fd());
    }

    fn tempfile() -> std::fs::File {
        let path = std::env::temp_dir().join(format!(
            "ipcwire-extended-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        std::fs::remove_file(&path).unwrap();
        file
    }
}
