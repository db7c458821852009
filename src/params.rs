// src/params.rs

//! Named parameters handed to a worker when it starts.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::errors::{ProcworkerError, Result};

/// Mapping from parameter name to an opaque payload.
///
/// Setting an existing name overwrites the previous value. The controller
/// clones the whole set when the worker starts, so the running worker always
/// sees the values as they were at that instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<String, Vec<u8>>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `name`. Returns the previous value, if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Value of `name` as UTF-8 text.
    ///
    /// Returns `Ok(None)` when the parameter is absent and `ParameterError`
    /// when it is present but not valid UTF-8.
    pub fn get_str(&self, name: &str) -> Result<Option<&str>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes).map(Some).map_err(|e| {
                ProcworkerError::ParameterError(format!("parameter '{name}' is not UTF-8: {e}"))
            }),
        }
    }

    /// Parse the textual value of `name` with `FromStr`.
    pub fn get_parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_str(name)? {
            None => Ok(None),
            Some(s) => s.trim().parse::<T>().map(Some).map_err(|e| {
                ProcworkerError::ParameterError(format!("parameter '{name}' = {s:?}: {e}"))
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterSet
where
    K: Into<String>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for (k, v) in iter {
            set.set(k, v);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_existing_name() {
        let mut params = ParameterSet::new();
        assert_eq!(params.set("x", "v1"), None);
        assert_eq!(params.set("x", "v2"), Some(b"v1".to_vec()));

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("x"), Some(&b"v2"[..]));
    }

    #[test]
    fn parsed_values_report_parameter_errors() {
        let params: ParameterSet = [("n", "42"), ("bad", "forty-two")].into_iter().collect();

        assert_eq!(params.get_parsed::<i32>("n").unwrap(), Some(42));
        assert_eq!(params.get_parsed::<i32>("missing").unwrap(), None);

        let err = params.get_parsed::<i32>("bad").unwrap_err();
        assert!(matches!(err, ProcworkerError::ParameterError(ref msg) if msg.contains("bad")));
    }

    #[test]
    fn non_utf8_payload_is_kept_opaque() {
        let mut params = ParameterSet::new();
        params.set("blob", vec![0xff, 0x00, 0xfe]);

        assert_eq!(params.get("blob"), Some(&[0xff, 0x00, 0xfe][..]));
        assert!(params.get_str("blob").is_err());
    }
}
