//! Convenience macro over [`crate::performance`].

/// Open a [`crate::performance::PerformanceSpan`], optionally with fields.
///
/// ```rust
/// use npusim_tracing::perf_span;
///
/// {
///     let _span = perf_span!("compile_pass", operators = 4);
/// } // logs its duration on drop
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = $crate::__private_tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        ).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}
