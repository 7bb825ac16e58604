//! # Kernel catalog
//!
//! The set of SPICE kernels an image label refers to, with their on-disk classification and
//! their load state in the kernel pool.
//!
//! ## Overview
//!
//! [`KernelCatalog::scan`] walks the `Kernels` group of a label in the fixed order given by
//! [`KERNEL_KEYWORDS`], resolves every file pattern and classifies it. A keyword whose value is
//! the `TABLE` sentinel is looked up in the attached table of the same name, whose own `Kernels`
//! keyword carries the list.
//!
//! Every record remembers two flags:
//!
//! * `loaded` – the kernel is currently in the pool;
//! * `managed` – *this catalog* furnished it and therefore owns the unload.
//!
//! A kernel found already loaded at scan time (furnished by another owner) is adopted as
//! loaded but unmanaged, and the pool's view of its type replaces the on-disk one. Unloading
//! only ever touches managed kernels, and dropping the catalog unloads every managed kernel.
//!
//! Furnish and unload failures are downgraded to "not loaded"/"not unloaded" and logged; they
//! never propagate.
//!
//! # See also
//! ------------
//! * [`KernelCatalog::load_scoped`] – load a subset for the lifetime of a guard.
//! * [`crate::spice::kernel_type`] – classification rules.

use std::cell::Cell;
use std::io::Read;
use std::ops::Deref;

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::{debug, info, warn};

use super::kernel_pool::KernelPool;
use super::kernel_type::{KernelType, TypeFilter, ID_WORD_LEN};
use crate::constants::{KERNEL_KEYWORDS, TABLE_SENTINEL};
use crate::file_name::FileResolver;
use crate::label::Label;
use crate::planetcal_errors::CalibrationError;

/// One kernel file referenced by a label.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelRecord {
    /// Reference as written in the label.
    pub path_pattern: String,
    /// Resolved filesystem path.
    pub path: Utf8PathBuf,
    pub exists: bool,
    kernel_type: Cell<KernelType>,
    loaded: Cell<bool>,
    managed: Cell<bool>,
}

impl KernelRecord {
    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    pub fn is_managed(&self) -> bool {
        self.managed.get()
    }

    pub fn depends_on(&self) -> Option<KernelType> {
        self.kernel_type().depends_on()
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

pub struct KernelCatalog<'p> {
    pool: &'p dyn KernelPool,
    resolver: FileResolver,
    records: Vec<KernelRecord>,
    camera_version: i32,
}

impl<'p> KernelCatalog<'p> {
    /// Build a catalog from the `Kernels` group of a label.
    ///
    /// Arguments
    /// -----------------
    /// * `label`: the image label; it must carry a `Kernels` group.
    /// * `pool`: the kernel pool this catalog furnishes into.
    /// * `resolver`: expands `$data` areas and version placeholders in file references.
    ///
    /// Return
    /// ----------
    /// * The catalog, or [`CalibrationError::Configuration`] if the label has no `Kernels` group.
    pub fn scan(
        label: &Label,
        pool: &'p dyn KernelPool,
        resolver: FileResolver,
    ) -> Result<Self, CalibrationError> {
        let kernels = label.require_group("Kernels")?;
        let camera_version = kernels
            .first("CameraVersion")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(1);

        let mut catalog = KernelCatalog {
            pool,
            resolver,
            records: Vec::new(),
            camera_version,
        };

        for key in KERNEL_KEYWORDS {
            let values = kernels
                .get(key)
                .or_else(|| (key == "Extras").then(|| kernels.get("Extra")).flatten());
            let Some(values) = values else {
                continue;
            };
            for value in values {
                if value.trim().eq_ignore_ascii_case(TABLE_SENTINEL) {
                    let listed = label
                        .table(key)
                        .and_then(|t| t.keywords.get("Kernels"))
                        .unwrap_or(&[]);
                    for file in listed {
                        if !file.trim().eq_ignore_ascii_case(TABLE_SENTINEL) {
                            catalog.push_pattern(file)?;
                        }
                    }
                } else {
                    catalog.push_pattern(value)?;
                }
            }
        }

        info!(
            "kernel catalog: {} kernels ({} missing), types [{}]",
            catalog.records.len(),
            catalog.missing(),
            catalog.kernel_types().iter().join(",")
        );
        Ok(catalog)
    }

    fn push_pattern(&mut self, pattern: &str) -> Result<(), CalibrationError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(());
        }
        let record = self.classify(pattern)?;
        if !self.records.iter().any(|r| r.path == record.path) {
            debug!("{} -> {} ({})", pattern, record.path, record.kernel_type());
            self.records.push(record);
        }
        Ok(())
    }

    /// Resolve and classify one file reference.
    ///
    /// The type comes from the file's id word, then its extension. If the pool already holds
    /// the exact path, its advertised type wins and the record is marked loaded but unmanaged.
    pub fn classify(&self, pattern: &str) -> Result<KernelRecord, CalibrationError> {
        let path = self.resolver.resolve(pattern)?;
        let exists = path.is_file();
        let head = if exists { read_head(&path) } else { Vec::new() };
        let mut kernel_type = KernelType::classify(&head, &path);
        let mut loaded = false;
        if let Some(pool_type) = self.pool.kernel_info(&path) {
            kernel_type = pool_type;
            loaded = true;
        }
        Ok(KernelRecord {
            path_pattern: pattern.to_string(),
            path,
            exists,
            kernel_type: Cell::new(kernel_type),
            loaded: Cell::new(loaded),
            managed: Cell::new(false),
        })
    }

    /// Furnish every matching NAIF kernel that is not loaded yet.
    ///
    /// Return
    /// ----------
    /// * The number of kernels newly furnished. Furnish failures leave the record unloaded.
    pub fn load(&self, types: impl Into<TypeFilter>) -> usize {
        self.load_matching(&types.into()).len()
    }

    fn load_matching(&self, filter: &TypeFilter) -> Vec<usize> {
        let mut furnished = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            let kernel_type = record.kernel_type();
            if !filter.matches(kernel_type) || !kernel_type.is_naif() || record.is_loaded() {
                continue;
            }
            match self.pool.furnish(&record.path) {
                Ok(()) => {
                    record.loaded.set(true);
                    record.managed.set(true);
                    furnished.push(i);
                }
                Err(e) => warn!("unable to furnish {}: {e}", record.path),
            }
        }
        furnished
    }

    /// Unload every matching kernel this catalog furnished.
    ///
    /// Return
    /// ----------
    /// * The number of kernels unloaded. Pool errors are ignored; the record is marked unloaded.
    pub fn unload(&self, types: impl Into<TypeFilter>) -> usize {
        let filter = types.into();
        let indices: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r.kernel_type()))
            .map(|(i, _)| i)
            .collect();
        self.unload_indices(&indices)
    }

    fn unload_indices(&self, indices: &[usize]) -> usize {
        let mut count = 0;
        for record in indices.iter().filter_map(|&i| self.records.get(i)) {
            if !(record.is_loaded() && record.is_managed()) {
                continue;
            }
            if let Err(e) = self.pool.unload(&record.path) {
                debug!("unload of {} ignored: {e}", record.path);
            }
            record.loaded.set(false);
            record.managed.set(false);
            count += 1;
        }
        count
    }

    /// Load the matching kernels for as long as the returned guard lives.
    pub fn load_scoped(&self, types: impl Into<TypeFilter>) -> LoadedKernels<'_, 'p> {
        let furnished = self.load_matching(&types.into());
        LoadedKernels {
            catalog: self,
            furnished,
        }
    }

    /// Paths of the matching kernels, in scan order.
    pub fn paths(&self, types: impl Into<TypeFilter>, strip_directory: bool) -> Vec<String> {
        let filter = types.into();
        self.records
            .iter()
            .filter(|r| filter.matches(r.kernel_type()))
            .map(|r| {
                if strip_directory {
                    r.file_name().to_string()
                } else {
                    r.path.to_string()
                }
            })
            .collect()
    }

    pub fn loaded_paths(&self, types: impl Into<TypeFilter>) -> Vec<String> {
        let filter = types.into();
        self.records
            .iter()
            .filter(|r| r.is_loaded() && filter.matches(r.kernel_type()))
            .map(|r| r.path.to_string())
            .collect()
    }

    pub fn missing(&self) -> usize {
        self.records.iter().filter(|r| !r.exists).count()
    }

    pub fn missing_paths(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !r.exists)
            .map(|r| r.path.to_string())
            .collect()
    }

    /// Distinct kernel types in scan order.
    pub fn kernel_types(&self) -> Vec<KernelType> {
        self.records.iter().map(|r| r.kernel_type()).unique().collect()
    }

    /// Classify and append a kernel; returns `false` if the path is already catalogued.
    pub fn add(&mut self, pattern: &str) -> Result<bool, CalibrationError> {
        let before = self.records.len();
        self.push_pattern(pattern)?;
        Ok(self.records.len() > before)
    }

    /// Append the records of `other` that this catalog does not hold yet.
    ///
    /// Merged records keep their load state but never their ownership: `other` remains
    /// responsible for unloading what it furnished.
    pub fn merge(&mut self, other: &KernelCatalog<'_>) -> usize {
        let mut added = 0;
        for record in &other.records {
            if self.records.iter().any(|r| r.path == record.path) {
                continue;
            }
            let mut copy = record.clone();
            copy.managed = Cell::new(false);
            self.records.push(copy);
            added += 1;
        }
        added
    }

    /// Adopt every kernel the pool reports as loaded, as unmanaged records.
    pub fn discover(&mut self) -> usize {
        let mut added = 0;
        for (path, kernel_type) in self.pool.loaded_kernels() {
            if self.records.iter().any(|r| r.path == path) {
                continue;
            }
            self.records.push(KernelRecord {
                path_pattern: path.to_string(),
                exists: path.is_file(),
                path,
                kernel_type: Cell::new(kernel_type),
                loaded: Cell::new(true),
                managed: Cell::new(false),
            });
            added += 1;
        }
        added
    }

    /// Re-query the pool for the load state of every record.
    pub fn update_load_status(&self) {
        for record in &self.records {
            match self.pool.kernel_info(&record.path) {
                Some(kernel_type) => {
                    record.kernel_type.set(kernel_type);
                    record.loaded.set(true);
                }
                None => {
                    record.loaded.set(false);
                    record.managed.set(false);
                }
            }
        }
    }

    pub fn records(&self) -> &[KernelRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn camera_version(&self) -> i32 {
        self.camera_version
    }

    pub fn pool(&self) -> &'p dyn KernelPool {
        self.pool
    }
}

impl Drop for KernelCatalog<'_> {
    fn drop(&mut self) {
        let all: Vec<usize> = (0..self.records.len()).collect();
        let count = self.unload_indices(&all);
        if count > 0 {
            debug!("kernel catalog released {count} kernels");
        }
    }
}

/// Kernels furnished by [`KernelCatalog::load_scoped`]; unloaded again on drop.
pub struct LoadedKernels<'c, 'p> {
    catalog: &'c KernelCatalog<'p>,
    furnished: Vec<usize>,
}

impl LoadedKernels<'_, '_> {
    /// Number of kernels this guard furnished.
    pub fn count(&self) -> usize {
        self.furnished.len()
    }
}

impl<'p> Deref for LoadedKernels<'_, 'p> {
    type Target = KernelCatalog<'p>;

    fn deref(&self) -> &Self::Target {
        self.catalog
    }
}

impl Drop for LoadedKernels<'_, '_> {
    fn drop(&mut self) {
        self.catalog.unload_indices(&self.furnished);
    }
}

fn read_head(path: &Utf8Path) -> Vec<u8> {
    let mut head = Vec::with_capacity(ID_WORD_LEN);
    if let Ok(file) = std::fs::File::open(path) {
        // an unreadable file classifies by extension only
        let _ = file.take(ID_WORD_LEN as u64).read_to_end(&mut head);
    }
    head
}

#[cfg(test)]
mod kernel_catalog_test {
    use super::*;
    use crate::label::{CachedTable, Group};
    use crate::spice::memory_pool::{MemoryKernelPool, PoolCall};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let files: [(&str, &[u8]); 6] = [
            ("mro_sc.bc", b"DAF/CK  "),
            ("mro.tsc", b"KPL/SCLK\n"),
            ("naif0012.tls", b"KPL/LSK\n"),
            ("mro.bsp", b"DAF/SPK "),
            ("mola.cub", b"Object = IsisCube"),
            ("hirise_addendum.ti", b"no id word here"),
        ];
        for (name, head) in files {
            std::fs::write(root.join(name), head).unwrap();
        }
        Fixture { _dir: dir, root }
    }

    fn label(root: &Utf8Path) -> Label {
        let kernels = Group::new()
            .with("InstrumentPointing", &["$k/mro_sc.bc", "TABLE"])
            .with("SpacecraftClock", &["$k/mro.tsc"])
            .with("LeapSecond", &["$k/naif0012.tls"])
            .with("InstrumentPosition", &["Table"])
            .with("ShapeModel", &["$k/mola.cub"])
            .with("InstrumentAddendum", &["$k/hirise_addendum.ti"])
            .with("Extra", &["$k/missing.bc"])
            .with("CameraVersion", &["2"]);
        Label::new()
            .with_group("Kernels", kernels)
            .with_table(
                CachedTable::new("InstrumentPosition", vec![])
                    .with_keyword("Kernels", &[format!("{root}/mro.bsp")]),
            )
    }

    fn resolver(root: &Utf8Path) -> FileResolver {
        FileResolver::new().with_data_area("k", root.to_path_buf())
    }

    #[test]
    fn test_scan_order_and_types() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let catalog = KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();

        assert_eq!(
            catalog.paths(TypeFilter::all(), true),
            vec![
                "mro.bsp",
                "mro_sc.bc",
                "hirise_addendum.ti",
                "naif0012.tls",
                "mro.tsc",
                "mola.cub",
                "missing.bc"
            ]
        );
        let types: Vec<KernelType> = catalog.records().iter().map(|r| r.kernel_type()).collect();
        assert_eq!(
            types,
            vec![
                KernelType::Spk,
                KernelType::Ck,
                KernelType::Iak,
                KernelType::Lsk,
                KernelType::Sclk,
                KernelType::Dem,
                KernelType::Ck
            ]
        );
        assert_eq!(catalog.missing(), 1);
        assert_eq!(catalog.camera_version(), 2);
    }

    #[test]
    fn test_missing_kernels_group() {
        let pool = MemoryKernelPool::new();
        let result = KernelCatalog::scan(&Label::new(), &pool, FileResolver::new());
        assert!(matches!(result, Err(CalibrationError::Configuration(_))));
    }

    #[test]
    fn test_load_unload_idempotent() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let catalog = KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();

        // DEM is never furnished and the missing CK fails quietly
        assert_eq!(catalog.load(""), 5);
        assert_eq!(catalog.load(""), 0);
        assert_eq!(catalog.loaded_paths("CK").len(), 1);

        assert_eq!(catalog.unload("CK"), 1);
        assert_eq!(catalog.unload("CK"), 0);
        assert_eq!(catalog.unload(TypeFilter::all()), 4);
        assert_eq!(catalog.unload(TypeFilter::all()), 0);
        assert!(pool.loaded_kernels().is_empty());
    }

    #[test]
    fn test_preloaded_kernel_is_adopted_not_owned() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let lsk = fx.root.join("naif0012.tls");
        pool.preload(lsk.clone(), KernelType::Lsk);
        {
            let catalog =
                KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
            let record = catalog.records().iter().find(|r| r.path == lsk).unwrap();
            assert!(record.is_loaded());
            assert!(!record.is_managed());
            assert_eq!(catalog.load("LSK"), 0);
            assert_eq!(catalog.unload("LSK"), 0);
        }
        assert!(pool.is_loaded(&lsk));
    }

    #[test]
    fn test_drop_releases_everything() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        {
            let catalog =
                KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
            catalog.load("CK,SCLK,LSK");
            assert_eq!(pool.loaded_kernels().len(), 3);
        }
        assert!(pool.loaded_kernels().is_empty());
    }

    #[test]
    fn test_rejected_furnish_is_not_fatal() {
        let fx = fixture();
        let pool = MemoryKernelPool::new().with_rejected(fx.root.join("mro.tsc"));
        let catalog = KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
        assert_eq!(catalog.load("SCLK,LSK"), 1);
        assert_eq!(catalog.loaded_paths("SCLK"), Vec::<String>::new());
    }

    #[test]
    fn test_scoped_load() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let catalog = KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
        catalog.load("LSK");
        {
            let scoped = catalog.load_scoped("CK,LSK");
            assert_eq!(scoped.count(), 1);
            assert_eq!(scoped.loaded_paths("CK,LSK").len(), 2);
        }
        // the guard releases the CK only
        assert_eq!(catalog.loaded_paths(TypeFilter::all()).len(), 1);
        let unloads = pool
            .calls()
            .into_iter()
            .filter(|c| matches!(c, PoolCall::Unload(_)))
            .count();
        assert_eq!(unloads, 1);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let catalog = KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
        let a = catalog.classify("$k/mro_sc.bc").unwrap();
        let b = catalog.classify("$k/mro_sc.bc").unwrap();
        assert_eq!(a.kernel_type(), b.kernel_type());
        assert_eq!(a, b);
    }

    #[test]
    fn test_add_merge_discover() {
        let fx = fixture();
        let pool = MemoryKernelPool::new();
        let mut catalog =
            KernelCatalog::scan(&label(&fx.root), &pool, resolver(&fx.root)).unwrap();
        assert!(!catalog.add("$k/mro.tsc").unwrap());

        let other_label = Label::new().with_group(
            "Kernels",
            Group::new().with("Frame", &[format!("{}/mro_sc.bc", fx.root)]),
        );
        let other = KernelCatalog::scan(&other_label, &pool, FileResolver::new()).unwrap();
        assert_eq!(catalog.merge(&other), 0);

        pool.preload("/elsewhere/pck00010.tpc", KernelType::Pck);
        assert_eq!(catalog.discover(), 1);
        assert!(catalog.kernel_types().contains(&KernelType::Pck));
        // discovered kernels are not ours to unload
        assert_eq!(catalog.unload("PCK"), 0);
    }
}
