use indexmap::IndexMap;
use std::path::Path;
use tracing::info;

use crate::config::CalculatorConfig;
use crate::count::{self, CountError};

/// Expanded by the shell that runs the calculator, never here.
pub const DEFAULT_TOTAL_MEMORY: &str = "$MEMORY_LIMIT";

/// Shell variable holding the calculator's output at launch time.
pub const CALCULATED_MEMORY_VAR: &str = "CALCULATED_MEMORY";

/// Preformatted JVM option that splices the calculated settings into `JAVA_OPTS`.
pub const CALCULATED_MEMORY_OPTS: &str = "$CALCULATED_MEMORY";

/// Formats the calculator command line:
///
/// `<exe> -totMemory=<ref> -stackThreads=<n> -loadedClasses=<n>[ -vmOptions="-<name><value> ..."]`
///
/// Option names and values are substituted verbatim and keep the map's order.
pub fn build_invocation(
    executable: &str,
    total_memory: &str,
    stack_threads: u32,
    class_count: u64,
    vm_options: &IndexMap<String, String>,
) -> String {
    let mut invocation = format!(
        "{executable} -totMemory={total_memory} -stackThreads={stack_threads} -loadedClasses={class_count}"
    );

    if !vm_options.is_empty() {
        let options = vm_options
            .iter()
            .map(|(name, value)| format!("-{name}{value}"))
            .collect::<Vec<_>>()
            .join(" ");
        invocation.push_str(&format!(" -vmOptions=\"{options}\""));
    }

    invocation
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub executable: String,
    pub total_memory: String,
    pub stack_threads: u32,
    pub class_count: u64,
    pub vm_options: IndexMap<String, String>,
}

impl InvocationSpec {
    pub fn new(
        executable: impl Into<String>,
        total_memory: impl Into<String>,
        config: &CalculatorConfig,
        class_count: u64,
    ) -> Self {
        Self {
            executable: executable.into(),
            total_memory: total_memory.into(),
            stack_threads: config.stack_threads,
            class_count,
            vm_options: config.vm_options.clone(),
        }
    }

    pub fn render(&self) -> String {
        build_invocation(
            &self.executable,
            &self.total_memory,
            self.stack_threads,
            self.class_count,
            &self.vm_options,
        )
    }
}

/// The configured `class_count` if any, otherwise the counted classes under `root`.
pub fn resolve_class_count(config: &CalculatorConfig, root: &Path) -> Result<u64, CountError> {
    if let Some(class_count) = config.class_count {
        info!(class_count, "using configured class count");
        return Ok(class_count);
    }

    let counted = count::count_classes(root)?;
    info!(class_count = counted, root = %root.display(), "counted application classes");
    Ok(counted)
}

/// Render `path` relative to `root` behind `$PWD`, for commands that run from
/// `root` at launch time. Both paths are made absolute against the current
/// directory first, so a relative `root` still yields a relative suffix.
pub fn qualify_path(path: &Path, root: &Path) -> String {
    let (Ok(absolute_path), Ok(absolute_root)) = (std::path::absolute(path), std::path::absolute(root))
    else {
        return path.display().to_string();
    };

    match pathdiff::diff_paths(&absolute_path, &absolute_root) {
        Some(relative) if relative.is_relative() => format!("$PWD/{}", relative.display()),
        _ => path.display().to_string(),
    }
}

/// `CALCULATED_MEMORY=$(<invocation>)`, prepended to the launch command.
pub fn memory_calculation_command(invocation: &str) -> String {
    format!("{CALCULATED_MEMORY_VAR}=$({invocation})")
}

/// Install name of a calculator release inside a sandbox `bin/` directory.
pub fn calculator_file_name(version: &str) -> String {
    format!("java-buildpack-memory-calculator-{version}")
}
