use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::{Error, Result};

/// The command that produces a variant's executable, run from the working directory that
/// holds the variant sources.
#[derive(Clone, Debug)]
pub struct BuildCommand {
    program: String,
    args: Vec<String>,
}

impl BuildCommand {
    /// Creates a build command from a program name and its arguments.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The program to invoke.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments to pass.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// One compiled synchronization strategy under comparison.
///
/// The strategy implementation itself is opaque to the harness; all that matters is how to
/// build its executable and what runtime arguments the executable accepts.
#[derive(Clone, Debug)]
pub struct Variant {
    id: String,
    build: BuildCommand,
    takes_cpu_argument: bool,
    library_path: Option<PathBuf>,
}

impl Variant {
    /// Creates a variant whose executable accepts `<readers> <writers> <cpu-set>`.
    pub fn new(id: impl Into<String>, build: BuildCommand) -> Self {
        Self {
            id: id.into(),
            build,
            takes_cpu_argument: true,
            library_path: None,
        }
    }

    /// Marks the variant's executable as taking only `<readers> <writers>`, without the
    /// trailing CPU-set argument.
    #[must_use]
    pub fn without_cpu_argument(mut self) -> Self {
        self.takes_cpu_argument = false;
        self
    }

    /// Declares a directory that must be on the dynamic library search path when the
    /// executable runs, relative to the working directory.
    #[must_use]
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// The variant's identifier, also the name of its executable.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The command that builds this variant.
    #[must_use]
    pub fn build_command(&self) -> &BuildCommand {
        &self.build
    }

    /// Whether the executable expects the CPU-set string as its third argument.
    #[must_use]
    pub fn takes_cpu_argument(&self) -> bool {
        self.takes_cpu_argument
    }

    /// The extra dynamic library search path the executable needs at run time, if any.
    #[must_use]
    pub fn library_path(&self) -> Option<&Path> {
        self.library_path.as_deref()
    }

    /// Where this variant's executable lives once built.
    #[must_use]
    pub fn executable(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.id)
    }

    /// Ensures the variant's executable exists by running the build command.
    ///
    /// The build always runs; rebuilding an up-to-date variant is harmless, and two workers
    /// racing to build the same variant merely perform redundant work (last writer of the
    /// executable wins).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] with the captured diagnostics when the command cannot
    /// be started or exits unsuccessfully.
    pub fn ensure_built(&self, workdir: &Path) -> Result<PathBuf> {
        info!(variant = %self.id, "building variant");

        let output = Command::new(&self.build.program)
            .args(&self.build.args)
            .current_dir(workdir)
            .output()
            .map_err(|error| Error::BuildFailed {
                variant: self.id.clone(),
                details: error.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::BuildFailed {
                variant: self.id.clone(),
                details: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        debug!(variant = %self.id, "build succeeded");

        Ok(self.executable(workdir))
    }
}

/// The static, declared-order table of variants available for benchmarking.
///
/// Declared order matters: the aggregator emits comparison datasets with variants in registry
/// order, so chart layout stays reproducible no matter in which order records were produced
/// or discovered.
#[derive(Debug)]
pub struct VariantRegistry {
    variants: Vec<Variant>,
}

impl VariantRegistry {
    /// The built-in table: the userspace-RCU reclamation flavors plus the two slot-based
    /// designs, with the gcc invocations that build them from the sources in the working
    /// directory.
    #[must_use]
    pub fn builtin() -> Self {
        let gcc = |args: &[&str]| BuildCommand::new("gcc", args.iter().copied());

        Self {
            variants: vec![
                Variant::new("qsbr", gcc(&["-o", "qsbr", "qsbr.c", "-lurcu-qsbr", "-lpthread"])),
                Variant::new(
                    "qsbr-bp",
                    gcc(&["-o", "qsbr-bp", "qsbr-bp.c", "-lurcu-bp", "-lpthread"]),
                ),
                Variant::new(
                    "qsbr-mb",
                    gcc(&["-o", "qsbr-mb", "qsbr-mb.c", "-lurcu", "-lurcu-mb", "-lpthread"]),
                ),
                Variant::new(
                    "qsbr-memb",
                    gcc(&["-o", "qsbr-memb", "qsbr-memb.c", "-lurcu", "-lpthread"]),
                ),
                Variant::new(
                    "signal",
                    gcc(&["-o", "signal", "signal.c", "-lurcu", "-lurcu-signal", "-lpthread"]),
                ),
                Variant::new(
                    "slotpair",
                    gcc(&[
                        "-o",
                        "slotpair",
                        "ctp.c",
                        "-DUSE_SLOT_PAIR_DESIGN",
                        "-L../",
                        "-ltsgv",
                        "-lpthread",
                        "-Wl,-rpath,../",
                    ]),
                )
                .with_library_path("../"),
                Variant::new(
                    "slotlist",
                    gcc(&[
                        "-o",
                        "slotlist",
                        "ctp.c",
                        "-DUSE_SLOT_LIST_DESIGN",
                        "-L../",
                        "-ltsgv",
                        "-lpthread",
                        "-Wl,-rpath,../",
                    ]),
                )
                .with_library_path("../"),
            ],
        }
    }

    /// Creates a registry from an explicit variant table, preserving the given order.
    #[must_use]
    pub fn from_variants(variants: Vec<Variant>) -> Self {
        Self { variants }
    }

    /// Looks up a variant by identifier.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.id() == id)
    }

    /// The position of a variant in declared order, used for dataset ordering.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.variants.iter().position(|variant| variant.id() == id)
    }

    /// All variants in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter()
    }

    /// The number of registered variants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn builtin_declared_order_is_stable() {
        let registry = VariantRegistry::builtin();

        let ids: Vec<_> = registry.iter().map(Variant::id).collect();
        assert_eq!(
            ids,
            vec![
                "qsbr",
                "qsbr-bp",
                "qsbr-mb",
                "qsbr-memb",
                "signal",
                "slotpair",
                "slotlist"
            ]
        );
    }

    #[test]
    fn resolves_every_builtin_id() {
        let registry = VariantRegistry::builtin();

        for variant in registry.iter() {
            assert!(registry.resolve(variant.id()).is_some());
        }
    }

    #[test]
    fn unknown_id_does_not_resolve() {
        let registry = VariantRegistry::builtin();
        assert!(registry.resolve("hazard-pointers").is_none());
    }

    #[test]
    fn slot_designs_need_the_library_path() {
        let registry = VariantRegistry::builtin();

        assert!(registry.resolve("slotpair").unwrap().library_path().is_some());
        assert!(registry.resolve("slotlist").unwrap().library_path().is_some());
        assert!(registry.resolve("qsbr").unwrap().library_path().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn failed_build_captures_diagnostics() {
        let temp = tempfile::tempdir().unwrap();

        let variant = Variant::new(
            "broken",
            BuildCommand::new("sh", ["-c", "echo nope >&2; exit 1"]),
        );

        let error = variant.ensure_built(temp.path()).unwrap_err();

        match error {
            Error::BuildFailed { variant, details } => {
                assert_eq!(variant, "broken");
                assert!(details.contains("nope"));
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn missing_build_program_is_a_build_failure() {
        let temp = tempfile::tempdir().unwrap();

        let variant = Variant::new(
            "ghost",
            BuildCommand::new("definitely-not-a-real-compiler", ["x"]),
        );

        assert!(matches!(
            variant.ensure_built(temp.path()),
            Err(Error::BuildFailed { .. })
        ));
    }
}
