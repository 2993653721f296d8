//! Parameters and their network bindings.
//!
//! A [`Parameter`] is a named scalar with dirty/present flags, independent of
//! where its value comes from. A [`BoundParam`] extends it with a wire name and
//! an owner: local parameters are published, remote ones mirror a peer.

use crate::addr::{split_scheme, Family};
use crate::arena::Key;
use crate::peer::PeerRef;
use crate::protocol::MTU;

/// Handle to a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) Key);

/// Scalar control value. NaN means undefined.
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    value: f64,
    dirty: bool,
    present: bool,
}

impl Parameter {
    pub fn new() -> Self {
        Self {
            value: f64::NAN,
            dirty: false,
            present: false,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Store `value`; the parameter turns dirty only when the value changes.
    pub fn set(&mut self, value: f64) {
        let same = self.value == value || (self.value.is_nan() && value.is_nan());
        if !same {
            self.value = value;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_present(&mut self) {
        self.present = true;
    }

    /// Losing a value is a change consumers must see.
    pub fn clear_present(&mut self) {
        if self.present {
            self.present = false;
            self.dirty = true;
        }
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Default for Parameter {
    fn default() -> Self {
        Self::new()
    }
}

/// Who owns the authoritative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Published by this process.
    Local,
    /// Mirrored from a peer.
    Remote(PeerRef),
}

/// Parameter bound to the network.
#[derive(Debug)]
pub struct BoundParam {
    pub(crate) param: Parameter,
    name: String,
    owner: Owner,
    writable: bool,
    /// Value waiting to be written to the owning remote.
    pub(crate) pending: f64,
    pub(crate) waiting: bool,
    /// Newly created; goes out with the next update even when clean.
    pub(crate) fresh: bool,
}

impl BoundParam {
    pub(crate) fn local(name: &str, writable: bool) -> Self {
        Self {
            param: Parameter::new(),
            name: name.to_string(),
            owner: Owner::Local,
            writable,
            pending: f64::NAN,
            waiting: false,
            fresh: true,
        }
    }

    pub(crate) fn remote(name: &str, owner: PeerRef) -> Self {
        Self {
            param: Parameter::new(),
            name: name.to_string(),
            owner: Owner::Remote(owner),
            writable: false,
            pending: f64::NAN,
            waiting: false,
            fresh: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn is_local(&self) -> bool {
        self.owner == Owner::Local
    }

    /// Remote peers may write this local parameter.
    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn parameter(&self) -> &Parameter {
        &self.param
    }

    /// Pending write value, if one has not been sent yet.
    pub fn pending_write(&self) -> Option<f64> {
        self.waiting.then_some(self.pending)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("no parameter type for '{0}'")]
    NotFound(String),
    #[error("bad parameter spec '{0}'")]
    BadSyntax(String),
    #[error("duplicate parameter '{0}'")]
    Duplicate(String),
    #[error("stale parameter handle")]
    Stale,
}

/// Parsed parameter spec: `netio:[+]NAME` or `<scheme>:<address>#NAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSpec<'a> {
    Local { name: &'a str, writable: bool },
    Remote { family: Family, addr: &'a str, name: &'a str },
}

impl<'a> ParamSpec<'a> {
    pub fn parse(spec: &'a str) -> Result<Self, ParamError> {
        let (kind, rest) = spec
            .split_once(':')
            .ok_or_else(|| ParamError::NotFound(spec.to_string()))?;
        if kind == "netio" {
            let (name, writable) = match rest.strip_prefix('+') {
                Some(name) => (name, true),
                None => (rest, false),
            };
            check_name(name).map_err(|_| ParamError::BadSyntax(spec.to_string()))?;
            return Ok(ParamSpec::Local { name, writable });
        }
        let (family, rest) =
            split_scheme(spec).map_err(|_| ParamError::NotFound(spec.to_string()))?;
        let (addr, name) = rest
            .split_once('#')
            .ok_or_else(|| ParamError::BadSyntax(spec.to_string()))?;
        check_name(name).map_err(|_| ParamError::BadSyntax(spec.to_string()))?;
        Ok(ParamSpec::Remote { family, addr, name })
    }
}

/// Wire names are single tokens: no separators, no `*` prefix.
pub fn check_name(name: &str) -> Result<(), ParamError> {
    let bad = name.is_empty()
        || name.len() > MTU / 2
        || name.starts_with('*')
        || name.contains(|c: char| c == '=' || c == '>' || c == '\n' || c == '\0');
    if bad {
        return Err(ParamError::BadSyntax(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_dirties_only_on_change() {
        let mut p = Parameter::new();
        assert!(p.value().is_nan());
        p.set(f64::NAN);
        assert!(!p.is_dirty());
        p.set(3.0);
        assert!(p.is_dirty());
        p.clear_dirty();
        p.set(3.0);
        assert!(!p.is_dirty());
    }

    #[test]
    fn clear_present_dirties_once() {
        let mut p = Parameter::new();
        p.mark_present();
        p.clear_present();
        assert!(!p.is_present());
        assert!(p.is_dirty());
        p.clear_dirty();
        p.clear_present();
        assert!(!p.is_dirty());
    }

    #[test]
    fn spec_forms() {
        assert_eq!(
            ParamSpec::parse("netio:+offset").unwrap(),
            ParamSpec::Local { name: "offset", writable: true }
        );
        assert_eq!(
            ParamSpec::parse("netio:lamp").unwrap(),
            ParamSpec::Local { name: "lamp", writable: false }
        );
        assert_eq!(
            ParamSpec::parse("unix:@house#lamp").unwrap(),
            ParamSpec::Remote { family: Family::Unix, addr: "@house", name: "lamp" }
        );
        assert_eq!(
            ParamSpec::parse("udp6:[::1]:7000#t").unwrap(),
            ParamSpec::Remote { family: Family::Inet6, addr: "[::1]:7000", name: "t" }
        );
    }

    #[test]
    fn spec_errors() {
        assert!(matches!(ParamSpec::parse("gpio:17"), Err(ParamError::NotFound(_))));
        assert!(matches!(ParamSpec::parse("lamp"), Err(ParamError::NotFound(_))));
        assert!(matches!(ParamSpec::parse("unix:@house"), Err(ParamError::BadSyntax(_))));
        assert!(matches!(ParamSpec::parse("netio:a=b"), Err(ParamError::BadSyntax(_))));
        assert!(matches!(ParamSpec::parse("netio:+"), Err(ParamError::BadSyntax(_))));
        assert!(matches!(ParamSpec::parse("netio:*ping"), Err(ParamError::BadSyntax(_))));
    }
}
