use tracing::warn;

use crate::core::{Error, MissingFieldPolicy, Result};
use crate::registry::VarId;
use crate::util::encode_fixed_str;

/// Ordered `name=value` pairs taken from one daemon response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    /// Creates an empty field set
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a response such as `leap=0, stratum=1, refid=PPS,\r\nversion="ntpd 4.2.8"`.
    ///
    /// A value runs from its `=` to the next comma outside double quotes or
    /// to the end of the text. Surrounding quotes are removed. Tokens without
    /// `=` are ignored.
    pub fn parse(text: &str) -> Self {
        let mut fields = Fields::new();
        let mut in_quotes = false;
        let mut start = 0;

        for (i, c) in text.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    fields.push_token(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        fields.push_token(&text[start..]);
        fields
    }

    fn push_token(&mut self, token: &str) {
        if let Some((name, value)) = token.split_once('=') {
            let name = name.trim();
            if name.is_empty() {
                return;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            self.insert(name, value);
        }
    }

    /// Appends a pair
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value recorded under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Slot representation of a published field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned byte
    U8,
    /// Unsigned 64-bit integer, little-endian
    U64,
    /// 32-bit float bit pattern, little-endian
    F32,
    /// `2^value` as a 32-bit float (ntpd reports precision as a log2 exponent)
    Pow2F32,
    /// NUL padded string of fixed length
    Str(usize),
    /// Version token of an `ntpd 4.2.8p15@1.3728-o ...` banner, NUL padded
    Version(usize),
}

impl FieldKind {
    /// Slot size in bytes
    pub fn size(&self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U64 => 8,
            FieldKind::F32 | FieldKind::Pow2F32 => 4,
            FieldKind::Str(len) | FieldKind::Version(len) => *len,
        }
    }

    /// Converts a textual value to slot bytes
    pub fn encode(&self, raw: &str) -> Result<Vec<u8>> {
        let raw = raw.trim();
        let bytes = match self {
            FieldKind::U8 => vec![parse_num::<u8>(raw)?],
            FieldKind::U64 => parse_num::<u64>(raw)?.to_le_bytes().to_vec(),
            FieldKind::F32 => parse_num::<f32>(raw)?.to_le_bytes().to_vec(),
            FieldKind::Pow2F32 => parse_num::<f32>(raw)?.exp2().to_le_bytes().to_vec(),
            FieldKind::Str(len) => encode_fixed_str(raw, *len),
            FieldKind::Version(len) => encode_fixed_str(version_token(raw), *len),
        };
        Ok(bytes)
    }
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::parse(format!("{:?}: {}", raw, e)))
}

fn version_token(banner: &str) -> &str {
    let rest = banner.strip_prefix("ntpd").map(str::trim_start).unwrap_or(banner);
    let token = rest.split_whitespace().next().unwrap_or("");
    token.split('@').next().unwrap_or(token)
}

/// A published field: daemon name plus slot representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldSpec { name, kind }
    }
}

/// Slot writes produced by one polling cycle
pub type Writes = Vec<(VarId, Vec<u8>)>;

/// Encodes every field of `specs` found in `fields` into a write for the
/// matching id of `ids`.
///
/// Returns `Ok(None)` when the cycle is to be discarded under
/// [`MissingFieldPolicy::AbortCycle`].
pub fn collect_writes(
    group: &str,
    specs: &[FieldSpec],
    ids: &[VarId],
    fields: &Fields,
    policy: MissingFieldPolicy,
) -> Result<Option<Writes>> {
    debug_assert_eq!(specs.len(), ids.len());

    let mut writes = Vec::with_capacity(specs.len());
    for (spec, &id) in specs.iter().zip(ids) {
        let encoded = fields
            .get(spec.name)
            .ok_or_else(|| Error::missing_field(spec.name))
            .and_then(|raw| spec.kind.encode(raw));

        match (encoded, policy) {
            (Ok(bytes), _) => writes.push((id, bytes)),
            (Err(e), MissingFieldPolicy::Skip) => {
                warn!(group, field = spec.name, error = %e, "Keeping previous value");
            }
            (Err(e), MissingFieldPolicy::AbortCycle) => {
                warn!(group, field = spec.name, error = %e, "Discarding polling cycle");
                return Ok(None);
            }
            (Err(e), MissingFieldPolicy::Fail) => {
                return Err(Error::missing_field(format!("{}.{}: {}", group, spec.name, e)));
            }
        }
    }
    Ok(Some(writes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: [FieldSpec; 3] = [
        FieldSpec::new("stratum", FieldKind::U8),
        FieldSpec::new("offset", FieldKind::F32),
        FieldSpec::new("refid", FieldKind::Str(8)),
    ];

    fn ids() -> Vec<VarId> {
        (0..3).map(VarId::new).collect()
    }

    #[test]
    fn test_parse_ntpd_response() {
        let fields = Fields::parse(
            "leap=0, stratum=1, refid=PPS,\r\noffset=-0.002, jitter=0.001,\r\nversion=\"ntpd 4.2.8p15@1.3728-o Wed, Sep 23 2020 (1)\"",
        );

        assert_eq!(fields.len(), 6);
        assert_eq!(fields.get("leap"), Some("0"));
        assert_eq!(fields.get("refid"), Some("PPS"));
        assert_eq!(fields.get("offset"), Some("-0.002"));
        assert_eq!(
            fields.get("version"),
            Some("ntpd 4.2.8p15@1.3728-o Wed, Sep 23 2020 (1)")
        );
        assert_eq!(fields.get("dstadr"), None);
    }

    #[test]
    fn test_parse_keeps_first_duplicate_and_ignores_junk() {
        let fields = Fields::parse("a=1,, garbage ,a=2,=3");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("a"), Some("1"));
    }

    #[test]
    fn test_field_encoding() {
        assert_eq!(FieldKind::U8.encode("16").unwrap(), vec![16]);
        assert_eq!(FieldKind::F32.encode("0.5").unwrap(), 0.5f32.to_le_bytes().to_vec());
        assert_eq!(
            FieldKind::Pow2F32.encode("-2").unwrap(),
            0.25f32.to_le_bytes().to_vec()
        );
        assert_eq!(FieldKind::U64.encode("1700000000").unwrap(), 1_700_000_000u64.to_le_bytes().to_vec());
        assert_eq!(FieldKind::Str(4).encode("GPS").unwrap(), b"GPS\0".to_vec());
        assert_eq!(
            FieldKind::Version(16).encode("ntpd 4.2.8p15@1.3728-o Wed Sep 23").unwrap(),
            crate::util::encode_fixed_str("4.2.8p15", 16)
        );
        assert!(FieldKind::U8.encode("300").is_err());
        assert!(FieldKind::F32.encode("n/a").is_err());
    }

    #[test]
    fn test_encoded_sizes_match_kind() {
        for (kind, raw) in [
            (FieldKind::U8, "1"),
            (FieldKind::U64, "1"),
            (FieldKind::F32, "1"),
            (FieldKind::Pow2F32, "1"),
            (FieldKind::Str(16), "a-very-long-reference-name"),
            (FieldKind::Version(16), "ntpd 4.2.8"),
        ] {
            assert_eq!(kind.encode(raw).unwrap().len(), kind.size());
        }
    }

    #[test]
    fn test_skip_policy_drops_only_missing_field() {
        let fields = Fields::parse("stratum=2, refid=GPS");
        let writes = collect_writes("peer", &SPECS, &ids(), &fields, MissingFieldPolicy::Skip)
            .unwrap()
            .unwrap();

        let written: Vec<u8> = writes.iter().map(|(id, _)| id.raw()).collect();
        assert_eq!(written, vec![0, 2]);
    }

    #[test]
    fn test_abort_policy_discards_cycle() {
        let fields = Fields::parse("stratum=2, offset=bogus, refid=GPS");
        let writes =
            collect_writes("peer", &SPECS, &ids(), &fields, MissingFieldPolicy::AbortCycle).unwrap();
        assert!(writes.is_none());
    }

    #[test]
    fn test_fail_policy_is_fatal() {
        let fields = Fields::parse("stratum=2, offset=0.1");
        let err = collect_writes("peer", &SPECS, &ids(), &fields, MissingFieldPolicy::Fail)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("peer.refid"));
    }
}
