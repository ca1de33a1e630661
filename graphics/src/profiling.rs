//! Profiling support via Tracy and per-frame render graph telemetry.
//!
//! # CPU Profiling
//!
//! Tracy instrumentation is enabled via the `profiling` Cargo feature. When
//! the feature is disabled (the default), all macros compile to no-ops.
//!
//! ```ignore
//! use lumen_graphics::profiling::{profile_scope, profile_function, frame_mark};
//!
//! fn record_frame() {
//!     profile_function!();
//!
//!     {
//!         profile_scope!("barriers");
//!         // ...
//!     }
//!     frame_mark!();
//! }
//! ```
//!
//! # Telemetry
//!
//! Independently of Tracy, the frame executor fills a
//! [`RenderGraphFrameProfilingData`] every frame: CPU recording time and draw
//! calls per pass, and GPU time per pass from timestamp queries. GPU results
//! are read only after the frame's fence has signaled, so the snapshot
//! returned by the executor describes the frame submitted one
//! frames-in-flight cycle earlier.

#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, Span, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Create a profiling span for the current scope.
///
/// The span ends when the scope exits.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Create a profiling span for the entire function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Create a profiling span for function (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Create a profiling span named at runtime, e.g. after a pass.
///
/// Heap-allocates the span name; prefer [`profile_scope!`] for static names.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _profile_span = $crate::profiling::Client::running()
            .map(|c| c.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}

/// Create a profiling span with a dynamic name (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _ = $name;
    };
}

/// Plot a value over time in Tracy.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

pub use frame_mark;
pub use profile_function;
pub use profile_plot;
pub use profile_scope;
pub use profile_scope_dynamic;

/// Timing of one pass in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassProfilingData {
    /// Pass name.
    pub name: String,
    /// CPU time spent recording the pass.
    pub cpu_ms: f64,
    /// GPU time of the pass's executions, if timestamps are available.
    pub gpu_ms: Option<f64>,
    /// Draw calls the pass recorded.
    pub draw_calls: u32,
    /// Rendering scopes the pass recorded.
    pub executions: u32,
}

/// Telemetry snapshot of one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderGraphFrameProfilingData {
    /// Frame counter of the described frame.
    pub frame_index: u64,
    /// CPU time of the whole `draw()` call.
    pub cpu_frame_ms: f64,
    /// GPU time between the first and last command of the frame.
    pub gpu_frame_ms: Option<f64>,
    /// Draw calls over all passes.
    pub total_draw_calls: u32,
    /// Per pass, in execution order.
    pub passes: Vec<PassProfilingData>,
}

impl RenderGraphFrameProfilingData {
    /// Look up a pass by name.
    pub fn pass(&self, name: &str) -> Option<&PassProfilingData> {
        self.passes.iter().find(|p| p.name == name)
    }
}

/// Convert a timestamp interval to milliseconds.
///
/// `period_ns` is the device's nanoseconds per tick. A reversed interval
/// (counter wrap) yields zero.
pub fn ticks_to_ms(begin: u64, end: u64, period_ns: f32) -> f64 {
    end.saturating_sub(begin) as f64 * period_ns as f64 / 1_000_000.0
}
