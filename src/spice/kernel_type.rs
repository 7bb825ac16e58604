//! Kernel type identification.
//!
//! Every NAIF kernel starts with an eight byte *identification word* of the form
//! `ARCH/TYPE`, e.g. `"DAF/SPK "`, `"DAF/CK  "`, `"KPL/FK  "` or `"DAS/EK  "`. The type is the
//! text after the last `/`. Older binary files only carry `"NAIF/DAF"`, and some text kernels
//! have no id word at all, in which case the file extension decides.
//!
//! # See also
//! ------------
//! * [`KernelType::classify`] – id word first, extension second.
//! * [`TypeFilter`] – the comma separated type lists accepted by the catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use nom::{
    bytes::complete::{take, take_till1},
    character::complete::char,
    combinator::rest,
    sequence::separated_pair,
    IResult, Parser,
};

/// Length of the identification word at the start of every kernel file.
pub const ID_WORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelType {
    Spk,
    Ck,
    Pck,
    Ik,
    Fk,
    Lsk,
    Sclk,
    Dem,
    Iak,
    Ek,
    Dsk,
    Meta,
    Unknown,
}

impl KernelType {
    /// Map a type tag (`"SPK"`, `"ck"`, `"MK"`, ...) to a kernel type.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "SPK" => KernelType::Spk,
            "CK" => KernelType::Ck,
            "PCK" => KernelType::Pck,
            "IK" => KernelType::Ik,
            "FK" => KernelType::Fk,
            "LSK" => KernelType::Lsk,
            "SCLK" => KernelType::Sclk,
            "DEM" => KernelType::Dem,
            "IAK" => KernelType::Iak,
            "EK" => KernelType::Ek,
            "DSK" => KernelType::Dsk,
            "META" | "MK" => KernelType::Meta,
            _ => KernelType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Spk => "SPK",
            KernelType::Ck => "CK",
            KernelType::Pck => "PCK",
            KernelType::Ik => "IK",
            KernelType::Fk => "FK",
            KernelType::Lsk => "LSK",
            KernelType::Sclk => "SCLK",
            KernelType::Dem => "DEM",
            KernelType::Iak => "IAK",
            KernelType::Ek => "EK",
            KernelType::Dsk => "DSK",
            KernelType::Meta => "META",
            KernelType::Unknown => "UNKNOWN",
        }
    }

    /// True if the kernel pool can furnish this type.
    pub fn is_naif(&self) -> bool {
        !matches!(self, KernelType::Dem | KernelType::Unknown)
    }

    /// Kernel type that must also be furnished for this one to be usable.
    pub fn depends_on(&self) -> Option<KernelType> {
        match self {
            KernelType::Ck => Some(KernelType::Sclk),
            KernelType::Iak => Some(KernelType::Ik),
            KernelType::Sclk => Some(KernelType::Lsk),
            _ => None,
        }
    }

    /// Guess the type from the file extension.
    pub fn from_extension(path: &Utf8Path) -> Self {
        let ext = path.extension().unwrap_or("").to_ascii_lowercase();
        let base = path.file_name().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "cub" => KernelType::Dem,
            "ti" if base.contains("addendum") => KernelType::Iak,
            "ti" => KernelType::Ik,
            "tsc" => KernelType::Sclk,
            "tf" => KernelType::Fk,
            "tls" => KernelType::Lsk,
            "tpc" => KernelType::Pck,
            "bc" => KernelType::Ck,
            "bsp" => KernelType::Spk,
            "bes" => KernelType::Ek,
            "bds" => KernelType::Dsk,
            "meta" => KernelType::Meta,
            _ => KernelType::Unknown,
        }
    }

    /// Classify a kernel from its leading bytes and its path.
    ///
    /// The id word wins when it names a concrete type. A missing id word, an unknown tag or the
    /// bare `DAF` architecture tag fall back on [`KernelType::from_extension`].
    ///
    /// Arguments
    /// -----------------
    /// * `head`: the first bytes of the file (at most [`ID_WORD_LEN`] are inspected).
    /// * `path`: the file path, for the extension fallback.
    pub fn classify(head: &[u8], path: &Utf8Path) -> Self {
        let tag = parse_id_word(head)
            .map(|(_, id)| id.kernel_tag)
            .unwrap_or_default();
        match KernelType::from_tag(&tag) {
            KernelType::Unknown => KernelType::from_extension(path),
            found => found,
        }
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(KernelType::from_tag(s))
    }
}

/// Decoded identification word.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdWord {
    /// Text before the first `/` (`DAF`, `KPL`, `DAS`, `NAIF`), empty when absent.
    pub architecture: String,
    /// Text after the last `/`, or the whole word when there is no `/`.
    pub kernel_tag: String,
}

fn arch_and_tag(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_till1(|c: char| c == '/'), char('/'), rest).parse(input)
}

/// Parse the identification word at the start of a kernel file.
///
/// Line breaks terminate the word; short inputs are accepted as-is.
pub fn parse_id_word(input: &[u8]) -> IResult<&[u8], IdWord> {
    let (input, word) = take(ID_WORD_LEN.min(input.len())).parse(input)?;
    let text = String::from_utf8_lossy(word);
    let text = text
        .split(|c: char| c == '\n' || c == '\r' || c == '\0')
        .next()
        .unwrap_or("")
        .trim();

    let id = match arch_and_tag(text) {
        Ok((_, (arch, tag))) => IdWord {
            architecture: arch.trim().to_string(),
            kernel_tag: tag.rsplit('/').next().unwrap_or(tag).trim().to_string(),
        },
        Err(_) => IdWord {
            architecture: String::new(),
            kernel_tag: text.to_string(),
        },
    };
    Ok((input, id))
}

/// A set of kernel types parsed from a comma separated list. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeFilter {
    types: BTreeSet<KernelType>,
}

impl TypeFilter {
    /// Filter matching every type.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse `"CK, fk,SCLK"`; blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        TypeFilter {
            types: list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(KernelType::from_tag)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn matches(&self, kernel_type: KernelType) -> bool {
        self.types.is_empty() || self.types.contains(&kernel_type)
    }
}

impl From<&str> for TypeFilter {
    fn from(list: &str) -> Self {
        TypeFilter::parse(list)
    }
}

#[cfg(test)]
mod test_kernel_type {
    use super::*;

    #[test]
    fn test_parse_id_word() {
        let (_, id) = parse_id_word(b"DAF/SPK \x00\x00\x00").unwrap();
        assert_eq!(id.architecture, "DAF");
        assert_eq!(id.kernel_tag, "SPK");

        let (_, id) = parse_id_word(b"KPL/FK\n\\begindata").unwrap();
        assert_eq!(id.kernel_tag, "FK");

        let (_, id) = parse_id_word(b"NAIF/DAF").unwrap();
        assert_eq!(id.kernel_tag, "DAF");

        let (_, id) = parse_id_word(b"hello").unwrap();
        assert_eq!(id.architecture, "");
        assert_eq!(id.kernel_tag, "hello");
    }

    #[test]
    fn test_classify() {
        let p = Utf8Path::new("/k/mro_sc.bc");
        assert_eq!(KernelType::classify(b"DAF/CK  ", p), KernelType::Ck);
        // bare DAF falls back on the extension
        assert_eq!(KernelType::classify(b"NAIF/DAF", p), KernelType::Ck);
        assert_eq!(
            KernelType::classify(b"", Utf8Path::new("/k/hirise_addendum_v01.ti")),
            KernelType::Iak
        );
        assert_eq!(
            KernelType::classify(b"", Utf8Path::new("/k/hirise.ti")),
            KernelType::Ik
        );
        assert_eq!(
            KernelType::classify(b"", Utf8Path::new("/k/mola.cub")),
            KernelType::Dem
        );
        assert_eq!(
            KernelType::classify(b"????????", Utf8Path::new("/k/readme.txt")),
            KernelType::Unknown
        );
        assert_eq!(
            KernelType::classify(b"KPL/MK  ", Utf8Path::new("/k/a.txt")),
            KernelType::Meta
        );
    }

    #[test]
    fn test_type_filter() {
        let filter = TypeFilter::parse(" ck, Fk ,,SCLK");
        assert!(filter.matches(KernelType::Ck));
        assert!(filter.matches(KernelType::Fk));
        assert!(filter.matches(KernelType::Sclk));
        assert!(!filter.matches(KernelType::Spk));
        assert!(TypeFilter::all().matches(KernelType::Dem));
    }

    #[test]
    fn test_naif_and_dependencies() {
        assert!(!KernelType::Dem.is_naif());
        assert!(!KernelType::Unknown.is_naif());
        assert!(KernelType::Meta.is_naif());
        assert_eq!(KernelType::Ck.depends_on(), Some(KernelType::Sclk));
        assert_eq!(KernelType::Spk.depends_on(), None);
    }
}
