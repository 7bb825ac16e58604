//! # Calibration configuration profiles
//!
//! The configuration is a set of named *profiles*, each a keyword → value-list map. The profile a
//! module sees is assembled from several of them:
//!
//! 1. the default profile (`Hical` unless configured otherwise),
//! 2. the profile named after the module (`ZeroBufferSmooth`, `GainLineDrift`, ...), which must
//!    exist,
//! 3. the device parameters `CCD`, `CHANNEL`, `TDI`, `BIN`, `FILTER` and `MODULE`,
//! 4. every profile named by the `ProfileOptions` patterns that exists once its `{KEY}`
//!    placeholders are replaced, in order. Each one found is appended to the profile name as
//!    `+[name]`.
//!
//! Later layers override earlier ones keyword by keyword.
//!
//! ```json
//! {
//!   "default_profile": "Hical",
//!   "profiles": {
//!     "Hical": { "ProfileOptions": ["{MODULE}_{CCD}_{CHANNEL}", "{MODULE}_{FILTER}"] },
//!     "ZeroBufferFit": { "MaximumIterations": 50 },
//!     "ZeroBufferFit_RED": { "ZeroBufferFitMinimumLines": 100 }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::data::Device;
use crate::label::Group;
use crate::planetcal_errors::CalibrationError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

fn default_profile_name() -> String {
    "Hical".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationConf {
    #[serde(default = "default_profile_name")]
    pub default_profile: String,
    #[serde(default)]
    profiles: BTreeMap<String, Group>,
    /// File the configuration was read from.
    #[serde(skip)]
    pub source: Option<String>,
}

impl Default for CalibrationConf {
    fn default() -> Self {
        CalibrationConf {
            default_profile: default_profile_name(),
            profiles: BTreeMap::new(),
            source: None,
        }
    }
}

impl CalibrationConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, CalibrationError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, CalibrationError> {
        let mut conf = Self::from_json(&std::fs::read_to_string(path)?)?;
        conf.source = Some(path.to_string());
        Ok(conf)
    }

    pub fn with_profile(mut self, name: &str, group: Group) -> Self {
        self.profiles.insert(name.to_string(), group);
        self
    }

    pub fn profile_exists(&self, name: &str) -> bool {
        self.raw_profile(name).is_some()
    }

    fn raw_profile(&self, name: &str) -> Option<&Group> {
        self.profiles
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, g)| g)
    }

    /// The default profile merged with the device parameters.
    pub fn default_profile(&self, device: &Device) -> Profile {
        let mut keywords = self
            .raw_profile(&self.default_profile)
            .cloned()
            .unwrap_or_default();
        keywords.merge(&parameters(device, &self.default_profile));
        Profile {
            name: self.default_profile.clone(),
            keywords,
        }
    }

    /// Assemble the profile of `module` for `device`.
    ///
    /// Return
    /// ----------
    /// * The merged [`Profile`], or [`CalibrationError::Configuration`] when the module has no
    ///   profile of its own.
    pub fn module_profile(
        &self,
        module: &str,
        device: &Device,
    ) -> Result<Profile, CalibrationError> {
        let own = self.raw_profile(module).ok_or_else(|| {
            CalibrationError::Configuration(format!(
                "configuration profile {module} does not exist"
            ))
        })?;

        let mut profile = Profile {
            name: module.to_string(),
            keywords: self
                .raw_profile(&self.default_profile)
                .cloned()
                .unwrap_or_default(),
        };
        profile.keywords.merge(own);
        profile.keywords.merge(&parameters(device, module));

        let options = profile
            .keywords
            .get("ProfileOptions")
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        for pattern in options {
            let option = profile.resolve(&pattern);
            if let Some(group) = self.raw_profile(&option) {
                profile.name.push_str(&format!("+[{option}]"));
                profile.keywords.merge(group);
            }
        }
        Ok(profile)
    }
}

fn parameters(device: &Device, module: &str) -> Group {
    Group::new()
        .with("CCD", &[device.ccd])
        .with("CHANNEL", &[device.channel])
        .with("TDI", &[device.tdi])
        .with("BIN", &[device.bin])
        .with("FILTER", &[device.filter()])
        .with("MODULE", &[module])
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "YES" | "1" | "ON" => Some(true),
        "FALSE" | "NO" | "0" | "OFF" => Some(false),
        _ => None,
    }
}

/// A resolved module profile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Profile {
    /// Module name followed by every option profile merged in, e.g. `GainLineDrift+[GainLineDrift_RED]`.
    pub name: String,
    pub keywords: Group,
}

impl Profile {
    pub fn exists(&self, key: &str) -> bool {
        self.keywords.contains(key)
    }

    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.keywords.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, CalibrationError> {
        self.keywords.first(key).ok_or_else(|| {
            CalibrationError::Configuration(format!(
                "keyword {key} missing from profile {}",
                self.name
            ))
        })
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, CalibrationError> {
        let raw = self.get_str(key)?;
        raw.trim().parse().map_err(|_| {
            CalibrationError::Configuration(format!("{key} = {raw} is not a number"))
        })
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, CalibrationError> {
        if self.exists(key) {
            self.get_f64(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, CalibrationError> {
        match self.keywords.first(key) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                CalibrationError::Configuration(format!("{key} = {raw} is not a count"))
            }),
            None => Ok(default),
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, CalibrationError> {
        match self.keywords.first(key) {
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                CalibrationError::Configuration(format!("{key} = {raw} is not a boolean"))
            }),
            None => Ok(default),
        }
    }

    /// `Debug::SkipModule = TRUE`.
    pub fn skip_module(&self) -> bool {
        self.keywords
            .first("Debug::SkipModule")
            .and_then(parse_bool)
            .unwrap_or(false)
    }

    /// Replace every `{KEY}` in `pattern` with the first value of `KEY`; unknown keys are kept.
    pub fn resolve(&self, pattern: &str) -> String {
        PLACEHOLDER
            .replace_all(pattern, |caps: &Captures| {
                self.keywords
                    .first(&caps[1])
                    .map_or_else(|| caps[0].to_string(), str::to_string)
            })
            .into_owned()
    }

    /// The value of `key` with its placeholders resolved, typically a file pattern.
    pub fn source(&self, key: &str) -> Result<String, CalibrationError> {
        Ok(self.resolve(self.get_str(key)?))
    }
}
