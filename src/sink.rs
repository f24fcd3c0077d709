//! Write-once destinations for retrieved values.

use crate::cache::ByteView;
use crate::error::{GroupError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::SystemTime;

/// Destination for a value and its expiration.
///
/// A sink accepts exactly one value; later writes fail with
/// [`GroupError::SinkAlreadySet`].
pub trait Sink: Send {
    /// Store `view`. Every other setter funnels into this one.
    fn set_view(&mut self, view: ByteView) -> Result<()>;

    /// The stored value, or [`GroupError::SinkNotSet`].
    fn view(&self) -> Result<ByteView>;

    /// Fail the way [`Sink::set_view`] would for `view`, without storing it.
    fn check(&self, view: &ByteView) -> Result<()> {
        let _ = view;
        if self.view().is_ok() {
            return Err(GroupError::SinkAlreadySet);
        }
        Ok(())
    }

    fn set_string(&mut self, value: &str, expire: Option<SystemTime>) -> Result<()> {
        self.set_bytes(value.as_bytes(), expire)
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        self.set_view(ByteView::new(Bytes::copy_from_slice(value), expire))
    }

    /// Expiration of the stored value, if any.
    fn expire(&self) -> Option<SystemTime> {
        self.view().ok().and_then(|view| view.expire())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        (**self).set_view(view)
    }

    fn view(&self) -> Result<ByteView> {
        (**self).view()
    }

    fn check(&self, view: &ByteView) -> Result<()> {
        (**self).check(view)
    }
}

/// Structured-value setter available on every sink.
pub trait SinkExt: Sink {
    /// Encode `value` and store it.
    fn set_structured<T: Serialize>(&mut self, value: &T, expire: Option<SystemTime>) -> Result<()> {
        let encoded = bincode::serialize(value)?;
        self.set_view(ByteView::new(encoded, expire))
    }
}

impl<S: Sink + ?Sized> SinkExt for S {}

fn store_once(slot: &mut Option<ByteView>, view: ByteView) -> Result<()> {
    if slot.is_some() {
        return Err(GroupError::SinkAlreadySet);
    }
    *slot = Some(view);
    Ok(())
}

fn stored(slot: &Option<ByteView>) -> Result<ByteView> {
    slot.clone().ok_or(GroupError::SinkNotSet)
}

/// Sink yielding the value as a UTF-8 string (lossily converted).
#[derive(Debug, Default)]
pub struct StringSink {
    value: String,
    view: Option<ByteView>,
}

impl StringSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }

    pub fn is_set(&self) -> bool {
        self.view.is_some()
    }
}

impl Sink for StringSink {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        let value = view.to_string();
        store_once(&mut self.view, view)?;
        self.value = value;
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        stored(&self.view)
    }
}

/// One [`StringSink`] per key of a batch.
pub fn batch_string_sinks(count: usize) -> Vec<StringSink> {
    (0..count).map(|_| StringSink::new()).collect()
}

/// Sink holding the raw bytes.
#[derive(Debug, Default)]
pub struct BytesSink {
    view: Option<ByteView>,
}

impl BytesSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Option<Bytes> {
        self.view.as_ref().map(ByteView::bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.view
            .as_ref()
            .map(|view| view.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.view.is_some()
    }

    pub(crate) fn take_view(&mut self) -> Option<ByteView> {
        self.view.take()
    }
}

impl Sink for BytesSink {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        store_once(&mut self.view, view)
    }

    fn view(&self) -> Result<ByteView> {
        stored(&self.view)
    }
}

/// Sink copying at most `capacity` bytes of the value.
///
/// The full value remains available through [`Sink::view`].
#[derive(Debug)]
pub struct TruncatingBytesSink {
    capacity: usize,
    buf: Vec<u8>,
    view: Option<ByteView>,
}

impl TruncatingBytesSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Vec::with_capacity(capacity),
            view: None,
        }
    }

    /// The (possibly truncated) bytes written.
    pub fn written(&self) -> &[u8] {
        &self.buf
    }
}

impl Sink for TruncatingBytesSink {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        let n = view.len().min(self.capacity);
        let prefix = view.as_slice()[..n].to_vec();
        store_once(&mut self.view, view)?;
        self.buf = prefix;
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        stored(&self.view)
    }
}

/// Sink decoding the value into a serde type.
#[derive(Debug)]
pub struct StructuredSink<T> {
    value: Option<T>,
    view: Option<ByteView>,
}

impl<T> Default for StructuredSink<T> {
    fn default() -> Self {
        Self {
            value: None,
            view: None,
        }
    }
}

impl<T: DeserializeOwned + Send> StructuredSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

impl<T: DeserializeOwned + Send> Sink for StructuredSink<T> {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        if self.view.is_some() {
            return Err(GroupError::SinkAlreadySet);
        }
        let value: T = bincode::deserialize(view.as_slice())?;
        self.value = Some(value);
        self.view = Some(view);
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        stored(&self.view)
    }

    fn check(&self, view: &ByteView) -> Result<()> {
        if self.view.is_some() {
            return Err(GroupError::SinkAlreadySet);
        }
        bincode::deserialize::<T>(view.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_string_sink_is_write_once() {
        let mut sink = StringSink::new();
        assert!(matches!(sink.view(), Err(GroupError::SinkNotSet)));

        sink.set_string("hello", None).unwrap();
        assert_eq!(sink.as_str(), "hello");

        let err = sink.set_string("again", None).unwrap_err();
        assert!(matches!(err, GroupError::SinkAlreadySet));
        assert_eq!(sink.as_str(), "hello");
    }

    #[test]
    fn test_sink_carries_expiration() {
        let expire = SystemTime::now() + Duration::from_secs(30);
        let mut sink = BytesSink::new();
        sink.set_bytes(b"payload", Some(expire)).unwrap();

        assert_eq!(sink.expire(), Some(expire));
        assert_eq!(sink.to_vec(), b"payload".to_vec());
    }

    #[test]
    fn test_truncating_sink_caps_copy() {
        let mut sink = TruncatingBytesSink::new(4);
        sink.set_bytes(b"abcdefgh", None).unwrap();

        assert_eq!(sink.written(), b"abcd");
        assert_eq!(sink.view().unwrap().len(), 8);
    }

    #[test]
    fn test_structured_sink_decodes() {
        let user = User {
            id: 12345,
            name: "John Doe".to_string(),
        };

        let mut encoded = BytesSink::new();
        encoded.set_structured(&user, None).unwrap();

        let mut decoded = StructuredSink::<User>::new();
        decoded.set_view(encoded.view().unwrap()).unwrap();
        assert_eq!(decoded.value(), Some(&user));
    }

    #[test]
    fn test_structured_sink_rejects_garbage() {
        let mut sink = StructuredSink::<User>::new();
        let err = sink.set_bytes(&[0xff], None).unwrap_err();
        assert!(matches!(err, GroupError::Codec(_)));
        assert!(sink.view().is_err());
    }

    #[test]
    fn test_check_does_not_store() {
        let good = ByteView::new(bincode::serialize(&7u32).unwrap(), None);
        let bad = ByteView::new(vec![0xff], None);

        let mut sink = StructuredSink::<u32>::new();
        sink.check(&good).unwrap();
        assert!(matches!(sink.check(&bad), Err(GroupError::Codec(_))));
        assert!(sink.view().is_err());

        sink.set_view(good.clone()).unwrap();
        assert!(matches!(sink.check(&good), Err(GroupError::SinkAlreadySet)));
    }

    #[test]
    fn test_batch_string_sinks() {
        let sinks = batch_string_sinks(3);
        assert_eq!(sinks.len(), 3);
        assert!(sinks.iter().all(|sink| !sink.is_set()));
    }
}
