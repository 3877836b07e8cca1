// pipeline.rs — Compilation state and stage orchestration
//
// Runs parse → resolve → pre-allocation scheduling → post-allocation
// scheduling over every kernel of a listing, optionally checking each pass
// with the schedule certificate, and collects diagnostics along the way.
//
// Preconditions: none (any source text is accepted).
// Postconditions: `CompilationState` holds every scheduled kernel, or
//                 `has_error` is set and the diagnostics say why.
// Failure modes: syntax and resolution errors, missing register allocation
//                (E0501), dependency cycles (E0500), failed certificates (E0502).
// Side effects: calls `on_stage_complete` after each stage; logs through `log`.

use std::time::Instant;

use serde::Serialize;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::isa::{Kernel, Selection};
use crate::schedule::{
    schedule_post_reg_allocation, schedule_pre_reg_allocation, GenContext, ScheduleOptions,
    SchedulePolicy, ScheduleReport,
};
use crate::verify::{verify_schedule, ScheduleCert, StageCert};

// ── Stages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Resolve,
    Schedule,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Resolve => "resolve",
            Stage::Schedule => "schedule",
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub schedule: ScheduleOptions,
    /// Check every pass with the schedule certificate.
    pub verify: bool,
}

// ── Artifacts ──────────────────────────────────────────────────────────────

/// A kernel after scheduling, with the traces of the passes that ran.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledKernel {
    pub kernel: Kernel,
    pub pre_alloc: Option<ScheduleReport>,
    pub post_alloc: Option<ScheduleReport>,
}

/// Holds all compilation artifacts and accumulated diagnostics.
#[derive(Debug, Default)]
pub struct CompilationState {
    /// Kernels as resolved, before any scheduling.
    pub resolved: Vec<Kernel>,
    pub scheduled: Vec<ScheduledKernel>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl CompilationState {
    /// The scheduled kernels in listing syntax.
    pub fn listing(&self) -> String {
        self.scheduled
            .iter()
            .map(|s| s.kernel.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The scheduled kernels and their traces as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Output<'a> {
            version: &'static str,
            kernels: &'a [ScheduledKernel],
        }
        serde_json::to_string_pretty(&Output {
            version: env!("CARGO_PKG_VERSION"),
            kernels: &self.scheduled,
        })
    }

    fn finish_stage(
        &mut self,
        stage: Stage,
        diags: Vec<Diagnostic>,
        started: Instant,
        on_stage_complete: &mut impl FnMut(Stage, &[Diagnostic]),
    ) -> bool {
        on_stage_complete(stage, &diags);
        let is_err = diags.iter().any(|d| d.level == DiagLevel::Error);
        self.diagnostics.extend(diags);
        log::info!(
            "{} complete, {:.1}ms",
            stage.name(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        if is_err {
            self.has_error = true;
        }
        !is_err
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Parse, resolve and schedule every kernel of `source`.
pub fn run_pipeline(
    source: &str,
    options: &RunOptions,
    mut on_stage_complete: impl FnMut(Stage, &[Diagnostic]),
) -> CompilationState {
    let mut state = CompilationState::default();

    let t = Instant::now();
    let parsed = crate::parser::parse(source);
    let diags = parsed
        .errors
        .iter()
        .map(|e| {
            Diagnostic::new(DiagLevel::Error, *e.span(), e.to_string()).with_code(codes::E0100)
        })
        .collect();
    if !state.finish_stage(Stage::Parse, diags, t, &mut on_stage_complete) {
        return state;
    }
    let Some(listing) = parsed.listing else {
        state.has_error = true;
        return state;
    };

    let t = Instant::now();
    let resolved = crate::resolve::resolve(&listing);
    state.resolved = resolved.kernels;
    if !state.finish_stage(Stage::Resolve, resolved.diagnostics, t, &mut on_stage_complete) {
        return state;
    }

    let t = Instant::now();
    let mut diags = Vec::new();
    for kernel in &state.resolved {
        let mut kernel = kernel.clone();
        match schedule_kernel(&mut kernel, options) {
            Ok((pre_alloc, post_alloc)) => state.scheduled.push(ScheduledKernel {
                kernel,
                pre_alloc,
                post_alloc,
            }),
            Err(diag) => diags.push(diag),
        }
    }
    state.finish_stage(Stage::Schedule, diags, t, &mut on_stage_complete);
    state
}

/// Run both scheduling passes over one kernel.
pub fn schedule_kernel(
    kernel: &mut Kernel,
    options: &RunOptions,
) -> Result<(Option<ScheduleReport>, Option<ScheduleReport>), Diagnostic> {
    let ctx = GenContext::new(kernel.simd_width).with_options(options.schedule);

    let before = options.verify.then(|| kernel.selection.clone());
    let pre = schedule_pre_reg_allocation(&ctx, &mut kernel.selection)?;
    if let (Some(before), Some(_)) = (&before, &pre) {
        let cert = verify_schedule(before, &kernel.selection, &ctx.resource_index(before, SchedulePolicy::PreAlloc));
        check_cert(&kernel.name, SchedulePolicy::PreAlloc, &cert)?;
    }

    if !options.schedule.post_alloc {
        return Ok((pre, None));
    }
    let Some(allocation) = kernel.allocation.as_ref() else {
        return Err(Diagnostic::error(
            codes::E0501,
            format!(
                "kernel `{}` has no register allocation for post-allocation scheduling",
                kernel.name
            ),
        )
        .with_hint("add an `alloc` line to the kernel, or pass --no-post-alloc"));
    };
    if let Some(reg) = allocation.first_unallocated(&kernel.selection) {
        return Err(Diagnostic::error(
            codes::E0501,
            format!(
                "virtual register %{} of kernel `{}` has no physical register",
                reg.0, kernel.name
            ),
        ));
    }

    let ctx = ctx.with_allocation(allocation);
    let before: Option<Selection> = options.verify.then(|| kernel.selection.clone());
    let post = schedule_post_reg_allocation(&ctx, &mut kernel.selection)?;
    if let Some(before) = &before {
        let cert = verify_schedule(before, &kernel.selection, &ctx.resource_index(before, SchedulePolicy::PostAlloc));
        check_cert(&kernel.name, SchedulePolicy::PostAlloc, &cert)?;
    }
    Ok((pre, post))
}

fn check_cert(kernel: &str, policy: SchedulePolicy, cert: &ScheduleCert) -> Result<(), Diagnostic> {
    if cert.all_pass() {
        log::debug!("{}: {} certificate passed", kernel, policy.name());
        return Ok(());
    }
    Err(Diagnostic::error(
        codes::E0502,
        format!(
            "{} schedule of kernel `{}` failed verification: {}",
            policy.name(),
            kernel,
            cert.failed().join(", ")
        ),
    ))
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds.
///
/// `source_hash`: SHA-256 of the raw listing text.
/// `schedule_hash`: SHA-256 of the emitted (scheduled) listing.
/// `version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub schedule_hash: [u8; 32],
    pub version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the schedule hash (64 characters).
    pub fn schedule_hash_hex(&self) -> String {
        bytes_to_hex(&self.schedule_hash)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "schedule_hash": self.schedule_hash_hex(),
            "version": self.version,
        });
        format!("{value:#}\n")
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the source text and the scheduled listing.
pub fn compute_provenance(source: &str, listing: &str) -> Provenance {
    Provenance {
        source_hash: sha256(source),
        schedule_hash: sha256(listing),
        version: env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "kernel k simd 8 {
        alloc %0 = g2, %1 = g3, %2 = g4
        block {
          mov %0 = #1
          mov %1 = #2
          add %2 = %0, %1
        }
      }";

    fn run(source: &str, options: RunOptions) -> CompilationState {
        run_pipeline(source, &options, |_, _| {})
    }

    #[test]
    fn schedules_every_kernel() {
        let options = RunOptions {
            verify: true,
            ..RunOptions::default()
        };
        let state = run(SRC, options);
        assert!(!state.has_error, "{:?}", state.diagnostics);
        assert_eq!(state.scheduled.len(), 1);
        let k = &state.scheduled[0];
        assert!(k.pre_alloc.is_some() && k.post_alloc.is_some());
        assert_eq!(k.kernel.selection.insn_count(), 3);
    }

    #[test]
    fn stages_are_reported_in_order() {
        let mut stages = Vec::new();
        run_pipeline(SRC, &RunOptions::default(), |stage, _| stages.push(stage));
        assert_eq!(stages, vec![Stage::Parse, Stage::Resolve, Stage::Schedule]);
    }

    #[test]
    fn syntax_error_stops_after_parse() {
        let state = run("kernel k simd 8 {", RunOptions::default());
        assert!(state.has_error);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0100));
        assert!(state.resolved.is_empty());
    }

    #[test]
    fn post_alloc_without_allocation() {
        let state = run("kernel k simd 8 { block { mov %1 = %0 } }", RunOptions::default());
        assert!(state.has_error);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0501));
        assert!(state.diagnostics[0].hint.is_some());
    }

    #[test]
    fn partially_allocated_kernel() {
        let state = run(
            "kernel k simd 8 { alloc %0 = g2 block { mov %1 = %0 } }",
            RunOptions::default(),
        );
        assert_eq!(state.diagnostics[0].code, Some(codes::E0501));
        assert!(state.diagnostics[0].message.contains("%1"));
    }

    #[test]
    fn post_alloc_can_be_disabled() {
        let options = RunOptions {
            schedule: ScheduleOptions {
                pre_alloc: true,
                post_alloc: false,
            },
            verify: true,
        };
        let state = run("kernel k simd 8 { block { mov %1 = %0 } }", options);
        assert!(!state.has_error);
        assert!(state.scheduled[0].post_alloc.is_none());
    }

    #[test]
    fn json_output_names_kernels() {
        let state = run(SRC, RunOptions::default());
        let json = state.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["kernels"][0]["kernel"]["name"], "k");
        assert_eq!(value["kernels"][0]["post_alloc"]["policy"], "PostAlloc");
    }

    #[test]
    fn provenance_is_stable() {
        let a = compute_provenance("x", "y");
        let b = compute_provenance("x", "y");
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert_ne!(a.source_hash, a.schedule_hash);
        let json: serde_json::Value = serde_json::from_str(&a.to_json()).expect("valid json");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
