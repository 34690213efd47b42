//! Chunk consumers for region responses.

use std::sync::Mutex;

use geode_core::{Deserializable, ObjectDataInput, Result};

use crate::chunk_handler::{read_chunk_object, ChunkedResult};

/// Collects every object of a chunked response, skipping nulls.
///
/// Used for KEY_SET and QUERY results.
pub(crate) struct ObjectChunks<T> {
    method: &'static str,
    items: Mutex<Vec<T>>,
}

impl<T> ObjectChunks<T> {
    pub(crate) fn new(method: &'static str) -> Self {
        Self {
            method,
            items: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl<T: Deserializable + Send> ChunkedResult for ObjectChunks<T> {
    fn handle_chunk(&self, _message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()> {
        let mut items = Vec::new();
        while input.remaining() > 0 {
            if let Some(item) = read_chunk_object::<T>(input, self.method)? {
                items.push(item);
            }
        }
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(items);
        Ok(())
    }
}

/// Collects the key/value pairs of a GET_ALL_70 response.
///
/// Each chunk holds alternating key and value objects; a null value marks
/// a key the server does not have.
pub(crate) struct EntryChunks<K, V> {
    entries: Mutex<Vec<(K, Option<V>)>>,
}

impl<K, V> Default for EntryChunks<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<K, V> EntryChunks<K, V> {
    pub(crate) fn take(&self) -> Vec<(K, Option<V>)> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl<K, V> ChunkedResult for EntryChunks<K, V>
where
    K: Deserializable + Send,
    V: Deserializable + Send,
{
    fn handle_chunk(&self, _message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()> {
        let mut entries = Vec::new();
        while input.remaining() > 0 {
            let key = read_chunk_object::<K>(input, "get_all")?;
            let value = read_chunk_object::<V>(input, "get_all")?;
            if let Some(key) = key {
                entries.push((key, value));
            }
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use geode_core::protocol::Part;

    fn payload(parts: &[Part]) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        for part in parts {
            part.write_to(&mut buf);
        }
        buf.freeze()
    }

    #[test]
    fn test_object_chunks_skip_nulls() {
        let chunks = ObjectChunks::<String>::new("key_set");
        let data = payload(&[
            Part::object(&"a".to_string()).unwrap(),
            Part::null_object(),
            Part::object(&"b".to_string()).unwrap(),
        ]);
        chunks
            .handle_chunk(0, &mut ObjectDataInput::new(&data))
            .unwrap();
        assert_eq!(chunks.take(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_entry_chunks_pair_keys_and_values() {
        let chunks = EntryChunks::<String, i32>::default();
        let data = payload(&[
            Part::object(&"a".to_string()).unwrap(),
            Part::object(&1i32).unwrap(),
            Part::object(&"b".to_string()).unwrap(),
            Part::null_object(),
        ]);
        chunks
            .handle_chunk(0, &mut ObjectDataInput::new(&data))
            .unwrap();
        assert_eq!(
            chunks.take(),
            vec![("a".to_string(), Some(1)), ("b".to_string(), None)]
        );
    }
}
