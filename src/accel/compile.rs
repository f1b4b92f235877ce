//! Function compiler adapter.
//!
//! Kernels take dynamically typed [`Args`] so the vectorized wrapper can
//! promote array-like arguments to the backend's [`NativeArray`] before the
//! call, and retry with the caller's original arguments if that call fails.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::accel::{panic_message, AccelerationConfig};
use crate::check::Category;

/// Immutable contiguous buffer; the vectorized backend's array type.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeArray(Arc<[f64]>);

impl NativeArray {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Deref for NativeArray {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for NativeArray {
    fn from(values: Vec<f64>) -> Self {
        Self(values.into())
    }
}

impl From<&[f64]> for NativeArray {
    fn from(values: &[f64]) -> Self {
        Self(values.into())
    }
}

/// A single kernel argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Text(String),
    /// Growable caller-side sequence.
    List(Vec<f64>),
    Array(NativeArray),
}

impl Arg {
    pub fn category(&self) -> Category {
        match self {
            Arg::Int(_) => Category::Int,
            Arg::Float(_) => Category::Float,
            Arg::Text(_) => Category::Text,
            Arg::List(_) | Arg::Array(_) => Category::Array,
        }
    }

    /// Numeric view of scalar arguments.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Int(v) => Some(*v as f64),
            Arg::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Element view of array-like arguments.
    pub fn as_slice(&self) -> Option<&[f64]> {
        match self {
            Arg::List(values) => Some(values.as_slice()),
            Arg::Array(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// Array-likes become [`Arg::Array`]; everything else is cloned as is.
    pub fn to_native(&self) -> Arg {
        match self {
            Arg::List(values) => Arg::Array(NativeArray::from(values.as_slice())),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Text(v) => write!(f, "{v:?}"),
            Arg::List(v) => write!(f, "{v:?}"),
            Arg::Array(v) => write!(f, "array({:?})", v.as_slice()),
        }
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<Vec<f64>> for Arg {
    fn from(v: Vec<f64>) -> Self {
        Arg::List(v)
    }
}

/// Positional and keyword arguments for one kernel call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Arg>,
    pub keyword: BTreeMap<String, Arg>,
}

impl Args {
    pub fn new(positional: Vec<Arg>) -> Self {
        Self {
            positional,
            keyword: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_keyword(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Arg> {
        self.keyword.get(name)
    }

    pub fn to_native(&self) -> Args {
        Args {
            positional: self.positional.iter().map(Arg::to_native).collect(),
            keyword: self
                .keyword
                .iter()
                .map(|(k, v)| (k.clone(), v.to_native()))
                .collect(),
        }
    }
}

/// Anything callable with [`Args`].
pub trait Kernel: Send + Sync {
    fn call(&self, args: &Args) -> Result<Arg>;
}

impl<F> Kernel for F
where
    F: Fn(&Args) -> Result<Arg> + Send + Sync,
{
    fn call(&self, args: &Args) -> Result<Arg> {
        self(args)
    }
}

/// How a [`Compiled`] kernel routes its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// Compilation off: plain pass-through.
    Interpreted,
    /// Native-array arguments with fallback to the original call.
    Vectorized,
    /// Already machine code; pass-through without fallback.
    Native,
}

/// A kernel wrapped according to the configuration at compile time.
pub struct Compiled<K> {
    name: String,
    mode: CompileMode,
    kernel: K,
}

impl<K> fmt::Debug for Compiled<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiled")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<K: Kernel> Compiled<K> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    pub fn into_inner(self) -> K {
        self.kernel
    }
}

impl<K: Kernel> Kernel for Compiled<K> {
    fn call(&self, args: &Args) -> Result<Arg> {
        match self.mode {
            CompileMode::Interpreted | CompileMode::Native => self.kernel.call(args),
            CompileMode::Vectorized => {
                let native = args.to_native();
                match panic::catch_unwind(AssertUnwindSafe(|| self.kernel.call(&native))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        warn!(function = %self.name, error = %e, "Vectorized execution failed. Using original function.");
                        self.kernel.call(args)
                    }
                    Err(payload) => {
                        warn!(
                            function = %self.name,
                            error = %panic_message(payload.as_ref()),
                            "Vectorized execution panicked. Using original function."
                        );
                        self.kernel.call(args)
                    }
                }
            }
        }
    }
}

impl AccelerationConfig {
    /// Wrap `kernel` for the current compilation settings.
    ///
    /// The decision is taken here, once; later configuration changes do not
    /// affect an already compiled kernel.
    pub fn compile<K: Kernel>(&self, name: impl Into<String>, kernel: K) -> Compiled<K> {
        let name = name.into();
        let mode = if !self.compilation_enabled() {
            CompileMode::Interpreted
        } else if self.vectorized_active() {
            info!("Vectorize-compiling {}", name);
            CompileMode::Vectorized
        } else {
            info!("Natively compiling {}", name);
            CompileMode::Native
        };
        Compiled { name, mode, kernel }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::Capabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(vectorized: bool, compile: bool) -> AccelerationConfig {
        let cfg = AccelerationConfig::new(Capabilities::new(vectorized, 4));
        if compile {
            cfg.enable_compilation();
        }
        cfg
    }

    fn sum_kernel(args: &Args) -> Result<Arg> {
        let values = args
            .get(0)
            .and_then(Arg::as_slice)
            .ok_or_else(|| anyhow::anyhow!("expected an array"))?;
        let scale = args.keyword("scale").and_then(Arg::as_f64).unwrap_or(1.0);
        Ok(Arg::Float(values.iter().sum::<f64>() * scale))
    }

    /// Accepts only caller-side lists, never native arrays.
    fn list_only(args: &Args) -> Result<Arg> {
        match args.get(0) {
            Some(Arg::List(values)) => Ok(Arg::Int(values.len() as i64)),
            other => anyhow::bail!("unsupported argument {:?}", other),
        }
    }

    #[test]
    fn test_disabled_compilation_is_identity() {
        let cfg = config(true, false);
        let compiled = cfg.compile("sum", sum_kernel);
        assert_eq!(compiled.mode(), CompileMode::Interpreted);
        let args = Args::new(vec![vec![1.0, 2.0].into()]);
        assert_eq!(compiled.call(&args).unwrap(), sum_kernel(&args).unwrap());
    }

    #[test]
    fn test_vectorized_mode_converts_array_likes() {
        let cfg = config(true, true);
        let seen = std::sync::Mutex::new(Vec::new());
        let compiled = cfg.compile("probe", |args: &Args| -> Result<Arg> {
            seen.lock().unwrap().push(args.clone());
            Ok(Arg::Int(0))
        });
        assert_eq!(compiled.mode(), CompileMode::Vectorized);

        let args = Args::new(vec![Arg::List(vec![1.0, 2.0]), Arg::Float(3.0), "label".into()])
            .with_keyword("weights", vec![0.5, 0.5]);
        compiled.call(&args).unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0].positional[0], Arg::Array(_)));
        assert_eq!(seen[0].positional[1], Arg::Float(3.0));
        assert_eq!(seen[0].positional[2], Arg::Text("label".to_string()));
        assert!(matches!(seen[0].keyword("weights"), Some(Arg::Array(_))));
    }

    #[test]
    fn test_vectorized_failure_retries_with_original_args() {
        let cfg = config(true, true);
        let compiled = cfg.compile("list_only", list_only);
        let args = Args::new(vec![Arg::List(vec![1.0, 2.0, 3.0])]);
        assert_eq!(compiled.call(&args).unwrap(), Arg::Int(3));
    }

    #[test]
    fn test_vectorized_panic_retries_once() {
        let cfg = config(true, true);
        let calls = AtomicUsize::new(0);
        let compiled = cfg.compile("flaky", |_: &Args| -> Result<Arg> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first call explodes");
            }
            Ok(Arg::Float(1.0))
        });
        assert_eq!(compiled.call(&Args::default()).unwrap(), Arg::Float(1.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_native_mode_propagates_errors() {
        let cfg = config(false, true);
        let compiled = cfg.compile("list_only", list_only);
        assert_eq!(compiled.mode(), CompileMode::Native);
        let err = compiled.call(&Args::new(vec![Arg::Float(1.0)])).unwrap_err();
        assert!(err.to_string().contains("unsupported argument"));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let cfg = config(true, true);
        let once = cfg.compile("sum", sum_kernel);
        let twice = cfg.compile("sum", cfg.compile("sum", sum_kernel));
        let args = Args::new(vec![vec![1.0, 2.0, 3.0].into()]).with_keyword("scale", 2.0);
        assert_eq!(once.call(&args).unwrap(), Arg::Float(12.0));
        assert_eq!(twice.call(&args).unwrap(), once.call(&args).unwrap());
        assert_eq!(twice.mode(), once.mode());
    }

    #[test]
    fn test_to_native_leaves_scalars() {
        assert_eq!(Arg::Int(3).to_native(), Arg::Int(3));
        assert_eq!(Arg::Text("x".into()).to_native(), Arg::Text("x".into()));
        let native = Arg::List(vec![1.0]).to_native();
        assert_eq!(native.as_slice(), Some(&[1.0][..]));
        assert_eq!(native.to_native(), native);
    }
}
