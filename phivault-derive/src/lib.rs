//! Derive macros for `phivault`.
//!
//! `#[derive(SensitiveFields)]` turns field annotations on a record type into
//! registry entries, so the struct definition and the encryption table cannot
//! drift apart.

#![warn(clippy::pedantic, clippy::nursery)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::ext::IdentExt;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr, Meta};

/// Derives `phivault::registry::SensitiveFields`.
///
/// Every field marked `#[sensitive]` is registered as encrypted. Adding
/// `hashable` also registers a blind index, and `rename` overrides the
/// document key when it differs from the Rust field name.
///
/// # Example
///
/// ```rust,ignore
/// use phivault::registry::FieldRegistry;
/// use phivault_derive::SensitiveFields;
///
/// #[derive(SensitiveFields)]
/// struct Patient {
///     patient_id: String,
///     #[sensitive(hashable)]
///     mrn: String,
///     #[sensitive(hashable, rename = "nhs_number")]
///     nhs: String,
///     #[sensitive]
///     clinical_notes: String,
/// }
///
/// let registry = FieldRegistry::builder().with_type::<Patient>().build()?;
/// ```
#[proc_macro_derive(SensitiveFields, attributes(sensitive))]
pub fn derive_sensitive_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

struct SensitiveField {
    name: String,
    hashable: bool,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "SensitiveFields can only be derived for structs",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "SensitiveFields requires named fields",
        ));
    };

    let mut entries = Vec::new();
    for field in &named.named {
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("sensitive")) {
            let ident = field.ident.as_ref().ok_or_else(|| {
                syn::Error::new_spanned(field, "SensitiveFields requires named fields")
            })?;
            entries.push(parse_field(ident.unraw().to_string(), attr)?);
        }
    }

    let names = entries.iter().map(|e| &e.name);
    let hashable = entries.iter().map(|e| e.hashable);

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::phivault::registry::SensitiveFields for #ident #ty_generics
        #where_clause
        {
            fn sensitive_fields() -> &'static [(&'static str, ::phivault::registry::FieldSpec)] {
                const FIELDS: &[(&str, ::phivault::registry::FieldSpec)] = &[
                    #(
                        (#names, ::phivault::registry::FieldSpec {
                            encrypt: true,
                            hashable: #hashable,
                        }),
                    )*
                ];
                FIELDS
            }
        }
    })
}

fn parse_field(name: String, attr: &syn::Attribute) -> syn::Result<SensitiveField> {
    let mut field = SensitiveField { name, hashable: false };

    if matches!(attr.meta, Meta::Path(_)) {
        return Ok(field);
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("hashable") {
            field.hashable = true;
            Ok(())
        } else if meta.path.is_ident("rename") {
            let value: LitStr = meta.value()?.parse()?;
            if value.value().trim().is_empty() {
                return Err(meta.error("rename must not be empty"));
            }
            field.name = value.value();
            Ok(())
        } else {
            Err(meta.error("expected `hashable` or `rename = \"...\"`"))
        }
    })?;

    Ok(field)
}
