//! Implementation of the `#[export]` attribute macro.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, ReturnType, Type, parse_macro_input, parse_quote};

pub fn export_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = TokenStream2::from(attr);
        return syn::Error::new_spanned(attr, "#[export] takes no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    match export_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn export_inner(input: &ItemFn) -> syn::Result<TokenStream2> {
    let sig = &input.sig;

    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "exported functions cannot be generic",
        ));
    }
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "exported functions cannot be async",
        ));
    }
    if let Some(abi) = &sig.abi {
        return Err(syn::Error::new_spanned(
            abi,
            "write a plain fn; #[export] adds extern \"C\"",
        ));
    }
    if let Some(variadic) = &sig.variadic {
        return Err(syn::Error::new_spanned(
            variadic,
            "variadic parameters cannot be described by a signature",
        ));
    }

    let param_types = extract_param_types(sig.inputs.iter())?;

    let ret_ty: Type = match &sig.output {
        ReturnType::Default => parse_quote!(()),
        ReturnType::Type(_, ty) => (**ty).clone(),
    };

    let fn_name = &sig.ident;
    let fn_name_str = fn_name.to_string();
    let meta_fn_name = format_ident!("__{}_meta", fn_name);
    let fn_vis = &input.vis;
    let fn_attrs = &input.attrs;
    let fn_block = &input.block;
    let fn_unsafety = &sig.unsafety;
    let fn_inputs = &sig.inputs;

    Ok(quote! {
        #(#fn_attrs)*
        #[unsafe(no_mangle)]
        #fn_vis #fn_unsafety extern "C" fn #fn_name(#fn_inputs) -> #ret_ty {
            ::hostlua_core::boundary::guard(#fn_name_str, move || -> #ret_ty #fn_block)
        }

        #[doc(hidden)]
        #fn_vis fn #meta_fn_name() -> ::hostlua_core::FunctionEntry {
            ::hostlua_core::FunctionEntry::new(
                #fn_name_str,
                ::hostlua_core::FunctionSignature::new(
                    ::std::vec![#(<#param_types as ::hostlua_core::Marshal>::KIND),*],
                    <#ret_ty as ::hostlua_core::Marshal>::KIND,
                ),
            )
        }
    })
}

/// Collect parameter types, rejecting receivers and destructuring patterns.
fn extract_param_types<'a>(inputs: impl Iterator<Item = &'a FnArg>) -> syn::Result<Vec<Type>> {
    let mut types = Vec::new();
    for arg in inputs {
        match arg {
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "exported functions cannot take self",
                ));
            }
            FnArg::Typed(pat_type) => {
                match &*pat_type.pat {
                    Pat::Ident(ident) if ident.by_ref.is_none() && ident.subpat.is_none() => {}
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "exported parameters must be plain identifiers",
                        ));
                    }
                }
                types.push((*pat_type.ty).clone());
            }
        }
    }
    Ok(types)
}
