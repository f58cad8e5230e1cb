//! The `#[derive(FromContext)]` macro (spec §4.2, §9 Design Notes:
//! "declares the handler as a function taking a typed struct whose field
//! names play the role of parameter names").
//!
//! Rust has no runtime introspection over a closure's parameter names, so
//! `viaduct::binder::FromContext` has to be implemented per callable
//! rather than derived from a closure signature at dispatch time. This
//! macro generates that implementation from a struct's field names and
//! types: each field becomes one name the binder resolves from the
//! context (free-form map, then fixed fields — spec §4.2), with `Option<T>`
//! fields resolving to `None` when absent and any other field type being a
//! hard bind failure when absent.
//!
//! Structured the way a derive macro with several independent
//! field-extraction traits tends to be: parse a `DeriveInput`, require
//! named-field struct shape, walk `fields.named` to build one binding
//! expression per field, then splice them into a single generated method
//! body. Here there's just the one trait, since this framework resolves
//! every parameter name against the same uniform context map rather than
//! several distinct sources (path params, JSON body, query params, ...).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

/// Field names with no fixed-field fallback in `Context::resolve` (spec
/// §4.2): `request`/`response` aren't JSON-representable outside the
/// single `ctx`/`context` special case, and `ended` is dispatcher-internal
/// bookkeeping. `params`/`query`/`body`/`pathname` are deliberately absent
/// from this list — `Context::resolve` does fall back to them, so a field
/// named `body` or `params` (spec scenario 3: `(params, body)`) binds
/// successfully. Duplicated here (rather than depending on
/// `viaduct::binder::UNRESOLVABLE_AS_PARAM`) because this crate cannot
/// depend on `viaduct` without a cycle — `viaduct` depends on
/// `viaduct-derive` for the macro itself.
const UNRESOLVABLE_AS_PARAM: &[&str] = &["request", "response", "ended"];

/// Derives `viaduct::binder::FromContext` for a struct with named fields.
///
/// ```rust,ignore
/// use viaduct::FromContext;
///
/// #[derive(FromContext)]
/// struct UserPath {
///     id: String,
///     referrer: Option<String>,
/// }
/// ```
///
/// Each field name becomes one of the callable's declared parameter
/// names. A plain field type (`id: String`) is a required binding —
/// absence at dispatch time is a bind failure the dispatcher reports as a
/// 400; an `Option<T>` field resolves to `None` when the name is absent
/// from the context rather than failing (spec §4.2: "or `absent` if
/// unresolved").
///
/// Field names with no fixed-field fallback (`request`, `response`,
/// `ended`) are rejected at compile time, since such a field could never
/// resolve to anything (spec §4.2). `params`, `query`, `body`, and
/// `pathname` are valid field names — `Context::resolve` falls back to
/// those fixed fields by name, which is exactly how spec scenario 3's
/// `(params, body)` handler works.
#[proc_macro_derive(FromContext)]
pub fn from_context_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as DeriveInput);
    let struct_name = &ast.ident;

    let fields = match &ast.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(
                    struct_name,
                    "FromContext can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(
                struct_name,
                "FromContext can only be derived for structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let mut reserved_errors = Vec::new();
    for field in fields {
        let Some(ident) = &field.ident else { continue };
        let name = ident.to_string();
        if UNRESOLVABLE_AS_PARAM.contains(&name.as_str()) {
            reserved_errors.push(
                syn::Error::new_spanned(
                    ident,
                    format!(
                        "field name {:?} has no fixed-field fallback in the context \
                         (request/response/ended) and can never be injected by name",
                        name
                    ),
                )
                .to_compile_error(),
            );
        }
    }
    if !reserved_errors.is_empty() {
        return TokenStream::from(quote! { #(#reserved_errors)* });
    }

    let param_names: Vec<String> = fields
        .iter()
        .filter_map(|f| f.ident.as_ref().map(|i| i.to_string()))
        .collect();

    let bindings: Vec<TokenStream2> = fields
        .iter()
        .map(|f| {
            let ident = f.ident.as_ref().expect("named field");
            let name = ident.to_string();
            match option_inner_type(&f.ty) {
                Some(inner) => quote! {
                    let #ident: ::std::option::Option<#inner> =
                        ::viaduct::binder::bind_optional(ctx, #name)?;
                },
                None => {
                    let ty = &f.ty;
                    quote! {
                        let #ident: #ty = ::viaduct::binder::bind_required(ctx, #name)?;
                    }
                }
            }
        })
        .collect();

    let field_idents: Vec<_> = fields.iter().filter_map(|f| f.ident.as_ref()).collect();

    let expanded = quote! {
        impl ::viaduct::binder::FromContext for #struct_name {
            fn param_names() -> &'static [&'static str] {
                &[#(#param_names),*]
            }

            fn from_context(
                ctx: &::viaduct::context::Context,
            ) -> ::std::result::Result<Self, ::viaduct::binder::BindError> {
                #(#bindings)*
                Ok(Self {
                    #(#field_idents,)*
                })
            }
        }
    };

    TokenStream::from(expanded)
}

/// If `ty` is exactly `Option<Inner>`, returns `Inner`; otherwise `None`.
/// Doesn't chase type aliases (`type Maybe<T> = Option<T>` would not be
/// recognized) — the same limitation most field-introspecting derive
/// macros accept, since resolving aliases needs more than syntactic
/// matching.
fn option_inner_type(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else { return None };
    if type_path.qself.is_some() {
        return None;
    }
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}
