//! Output planning: which files the engine will write and where.

use std::{
    io,
    path::{Path, PathBuf},
};

use tempfile::{Builder, TempPath};
use tracing::debug;

use crate::{
    error::{CambError, Result},
    params::{coerce_flag, Params},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputSlot {
    Scalar,
    Vector,
    Tensor,
    Total,
    Lensed,
    LensPotential,
    LensedTotal,
    Transfer,
    TransferMatterPower,
    Fits,
    OutputRoot,
}

impl OutputSlot {
    pub const ALL: [OutputSlot; 11] = [
        OutputSlot::Scalar,
        OutputSlot::Vector,
        OutputSlot::Tensor,
        OutputSlot::Total,
        OutputSlot::Lensed,
        OutputSlot::LensPotential,
        OutputSlot::LensedTotal,
        OutputSlot::Transfer,
        OutputSlot::TransferMatterPower,
        OutputSlot::Fits,
        OutputSlot::OutputRoot,
    ];

    /// Parameter name the engine reads the output path from.
    pub fn key(self) -> &'static str {
        match self {
            OutputSlot::Scalar => "scalar_output_file",
            OutputSlot::Vector => "vector_output_file",
            OutputSlot::Tensor => "tensor_output_file",
            OutputSlot::Total => "total_output_file",
            OutputSlot::Lensed => "lensed_output_file",
            OutputSlot::LensPotential => "lens_potential_output_file",
            OutputSlot::LensedTotal => "lensed_total_output_file",
            OutputSlot::Transfer => "transfer_filename(1)",
            OutputSlot::TransferMatterPower => "transfer_matterpower(1)",
            OutputSlot::Fits => "FITS_filename",
            OutputSlot::OutputRoot => "output_root",
        }
    }

    /// Name of the table in the result, `None` for outputs that are discarded.
    pub fn result_key(self) -> Option<&'static str> {
        match self {
            OutputSlot::Scalar => Some("scalar"),
            OutputSlot::Vector => Some("vector"),
            OutputSlot::Tensor => Some("tensor"),
            OutputSlot::Lensed => Some("lensed"),
            OutputSlot::LensPotential => Some("lens_potential"),
            OutputSlot::Transfer => Some("transfer"),
            OutputSlot::TransferMatterPower => Some("transfer_matterpower"),
            OutputSlot::Total | OutputSlot::LensedTotal | OutputSlot::Fits | OutputSlot::OutputRoot => {
                None
            }
        }
    }

    pub fn is_output_key(key: &str) -> bool {
        Self::ALL.iter().any(|s| s.key().eq_ignore_ascii_case(key))
    }

    fn suffix(self) -> String {
        self.key().replace(['(', ')'], "")
    }
}

/// Flags checked in order, each enabling one or more slots.
const FLAG_SLOTS: &[(&str, &[OutputSlot])] = &[
    ("get_scalar_cls", &[OutputSlot::Scalar]),
    ("get_vector_cls", &[OutputSlot::Vector]),
    ("get_tensor_cls", &[OutputSlot::Tensor]),
    // lensed is requested twice; both requests share one path
    ("do_lensing", &[OutputSlot::Lensed, OutputSlot::Lensed]),
    ("get_transfer", &[OutputSlot::Transfer, OutputSlot::TransferMatterPower]),
];

#[derive(Debug)]
pub struct PlannedOutput {
    pub slot: OutputSlot,
    path: TempPath,
}

impl PlannedOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Scratch paths of one invocation. Dropping the set removes every path.
#[derive(Debug)]
pub struct OutputFileSet {
    requested: Vec<OutputSlot>,
    outputs: Vec<PlannedOutput>,
    param_path: TempPath,
}

impl OutputFileSet {
    /// Slots in flag order, duplicates included.
    pub fn requested(&self) -> &[OutputSlot] {
        &self.requested
    }

    pub fn outputs(&self) -> &[PlannedOutput] {
        &self.outputs
    }

    pub fn slots(&self) -> Vec<OutputSlot> {
        self.outputs.iter().map(|o| o.slot).collect()
    }

    pub fn param_path(&self) -> &Path {
        &self.param_path
    }

    pub fn path_of(&self, slot: OutputSlot) -> Option<&Path> {
        self.outputs.iter().find(|o| o.slot == slot).map(|o| o.path())
    }

    pub fn inject(&self, params: &mut Params) {
        for out in &self.outputs {
            params.insert(out.slot.key().to_string(), out.path().to_string_lossy().into_owned());
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputPlan {
    scratch_dir: PathBuf,
}

impl OutputPlan {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self { scratch_dir: scratch_dir.into() }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Allocates paths only; nothing is created on disk.
    pub fn plan(&self, params: &Params) -> Result<OutputFileSet> {
        let mut requested = Vec::new();
        for (flag, slots) in FLAG_SLOTS {
            let set = match params.get(*flag) {
                Some(v) => coerce_flag(v).is_set(),
                None => {
                    debug!("flag {} not present, treating as unset", flag);
                    false
                }
            };
            if set {
                requested.extend_from_slice(slots);
            }
        }

        let mut outputs: Vec<PlannedOutput> = Vec::new();
        for &slot in &requested {
            if outputs.iter().any(|o| o.slot == slot) {
                continue;
            }
            outputs.push(PlannedOutput {
                slot,
                path: self.allocate(&slot.suffix())?,
            });
        }

        Ok(OutputFileSet {
            requested,
            outputs,
            param_path: self.allocate("param")?,
        })
    }

    /// Random name under the scratch dir. A name that already exists is
    /// rejected so the builder draws another one. The scratch dir must exist.
    fn allocate(&self, suffix: &str) -> Result<TempPath> {
        let suffix = format!("_{suffix}");
        let named = Builder::new()
            .prefix("camb4rs_")
            .suffix(&suffix)
            .rand_bytes(12)
            .make_in(&self.scratch_dir, |path| match path.symlink_metadata() {
                Ok(_) => Err(io::Error::from(io::ErrorKind::AlreadyExists)),
                Err(e) if e.kind() == io::ErrorKind::NotFound && path.parent().is_some_and(Path::is_dir) => Ok(()),
                Err(e) => Err(e),
            })
            .map_err(|source| CambError::Scratch {
                path: self.scratch_dir.clone(),
                source,
            })?;
        Ok(named.into_temp_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn flags(values: [&str; 5]) -> Params {
        let mut p = Params::new();
        for ((flag, _), v) in FLAG_SLOTS.iter().zip(values) {
            p.insert(flag.to_string(), v.to_string());
        }
        p
    }

    #[test]
    fn test_no_flags_plans_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let set = OutputPlan::new(dir.path()).plan(&flags(["F"; 5])).unwrap();
        assert!(set.requested().is_empty());
        assert!(set.outputs().is_empty());
        assert!(set.param_path().starts_with(dir.path()));
    }

    #[test]
    fn test_each_flag_toggles_its_slots_independently() {
        let dir = tempfile::tempdir().unwrap();
        let plan = OutputPlan::new(dir.path());
        for mask in 0u32..32 {
            let values: Vec<&str> = (0..5).map(|i| if mask & (1 << i) != 0 { "T" } else { "false" }).collect();
            let set = plan.plan(&flags([values[0], values[1], values[2], values[3], values[4]])).unwrap();
            let got: HashSet<OutputSlot> = set.slots().into_iter().collect();
            let mut want = HashSet::new();
            for (i, (_, slots)) in FLAG_SLOTS.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    want.extend(slots.iter().copied());
                }
            }
            assert_eq!(got, want, "mask {mask:05b}");
        }
    }

    #[test]
    fn test_lensing_requests_duplicate_slot_with_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let set = OutputPlan::new(dir.path()).plan(&flags(["F", "F", "F", "True", "F"])).unwrap();
        assert_eq!(set.requested(), &[OutputSlot::Lensed, OutputSlot::Lensed]);
        assert_eq!(set.outputs().len(), 1);
        assert_eq!(set.outputs()[0].slot.result_key(), Some("lensed"));
    }

    #[test]
    fn test_text_flag_passes_through_as_truthy() {
        let dir = tempfile::tempdir().unwrap();
        let set = OutputPlan::new(dir.path()).plan(&flags(["yes", "", "F", "F", "F"])).unwrap();
        assert_eq!(set.slots(), vec![OutputSlot::Scalar]);
    }

    #[test]
    fn test_missing_flags_are_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Params::new();
        p.insert("get_transfer".into(), "t".into());
        let set = OutputPlan::new(dir.path()).plan(&p).unwrap();
        assert_eq!(set.slots(), vec![OutputSlot::Transfer, OutputSlot::TransferMatterPower]);
    }

    #[test]
    fn test_paths_are_unique_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let plan = OutputPlan::new(dir.path());
        let a = plan.plan(&flags(["T"; 5])).unwrap();
        let b = plan.plan(&flags(["T"; 5])).unwrap();
        let mut seen = HashSet::new();
        for set in [&a, &b] {
            assert!(seen.insert(set.param_path().to_path_buf()));
            for out in set.outputs() {
                assert!(seen.insert(out.path().to_path_buf()));
                assert!(!out.path().exists());
            }
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_inject_and_drop_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let set = OutputPlan::new(dir.path()).plan(&flags(["T", "F", "F", "F", "F"])).unwrap();
        let mut params = Params::new();
        set.inject(&mut params);
        let path = PathBuf::from(&params["scalar_output_file"]);
        assert_eq!(Some(path.as_path()), set.path_of(OutputSlot::Scalar));

        std::fs::write(&path, "1 2\n").unwrap();
        std::fs::write(set.param_path(), "END\n").unwrap();
        drop(set);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_names_carry_prefix_and_slot_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let set = OutputPlan::new(dir.path()).plan(&flags(["F", "F", "F", "F", "T"])).unwrap();
        let name = |p: &Path| p.file_name().unwrap().to_str().unwrap().to_string();
        let transfer = name(set.path_of(OutputSlot::Transfer).unwrap());
        assert!(transfer.starts_with("camb4rs_"), "{transfer}");
        assert!(transfer.ends_with("_transfer_filename1"), "{transfer}");
        assert!(name(set.param_path()).ends_with("_param"));
    }

    #[test]
    fn test_missing_scratch_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = OutputPlan::new(dir.path().join("gone"));
        let err = plan.plan(&flags(["T", "F", "F", "F", "F"])).unwrap_err();
        assert!(matches!(err, CambError::Scratch { .. }));
    }

    #[test]
    fn test_output_key_match_ignores_case() {
        assert!(OutputSlot::is_output_key("fits_filename"));
        assert!(OutputSlot::is_output_key("transfer_matterpower(1)"));
        assert!(!OutputSlot::is_output_key("transfer_redshift(1)"));
    }
}
