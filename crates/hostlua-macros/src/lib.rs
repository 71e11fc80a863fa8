//! hostlua proc macros
//!
//! # Macros
//!
//! - `#[export]` - Export a function over the C ABI and generate its
//!   registration metadata

use proc_macro::TokenStream;

mod export;

/// Export a function over the C ABI.
///
/// Write a plain Rust function whose parameter and return types implement
/// `hostlua_core::Marshal`. The attribute emits:
///
/// - the function itself as `#[unsafe(no_mangle)] extern "C"`, with its body
///   run inside `hostlua_core::boundary::guard` so a panic never unwinds
///   into the host;
/// - a hidden `__<name>_meta()` returning the `FunctionEntry`, whose
///   signature is built from `<T as Marshal>::KIND` of each parameter and
///   the return type.
///
/// Functions taking raw pointers should be declared `unsafe fn`; the
/// `unsafe` qualifier is kept on the generated export.
///
/// # Example
///
/// ```ignore
/// #[export]
/// pub fn hostlua_gettop(state: EngineHandle) -> i32 {
///     with_instance(state, |inst| inst.top())
/// }
///
/// // Generated alongside:
/// // pub fn __hostlua_gettop_meta() -> FunctionEntry  // "handle i32"
/// ```
#[proc_macro_attribute]
pub fn export(attr: TokenStream, item: TokenStream) -> TokenStream {
    export::export_impl(attr, item)
}
