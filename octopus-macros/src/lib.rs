//! Proc macros for structured model output.
//!
//! Provides `#[derive(StructuredOutput)]`, which generates a JSON schema from
//! a struct definition so the text-generation service can be asked for a JSON
//! object of exactly that shape.
//!
//! # Example
//!
//! ```ignore
//! /// Items gained and lost this turn
//! #[derive(StructuredOutput, Deserialize)]
//! #[structured(name = "set_changes")]
//! struct SetChanges {
//!     /// Labels to add
//!     #[structured(optional)]
//!     #[serde(default)]
//!     added: Vec<String>,
//!     /// Labels to remove
//!     removed: Option<Vec<String>>,
//! }
//! ```
//!
//! Fields whose type is not a primitive, `String`, `Option` or `Vec` are
//! assumed to derive `StructuredOutput` themselves and are inlined.
//! The generated impl targets `octopus_core::llm::StructuredOutput`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Field, Lit, Meta, Type};

/// Derive macro for `octopus_core::llm::StructuredOutput`.
///
/// # Attributes
///
/// - `#[structured(name = "...")]` - Override the schema name (defaults to snake_case struct name)
/// - `#[structured(optional)]` on fields - Mark field as not required in the schema
/// - `#[structured(rename = "...")]` on fields - Override field name in schema
#[proc_macro_derive(StructuredOutput, attributes(structured))]
pub fn derive_structured_output(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_structured_output(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_structured_output(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let schema_name = get_schema_name(&input)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "StructuredOutput derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "StructuredOutput derive only supports structs",
            ))
        }
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let field_name_str = get_field_name(field)?;
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty);

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = ::serde_json::json!(#field_desc); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name_str.to_string(), property);
            }
        });

        if !is_field_optional(field) && !is_option_type(&field.ty) {
            required_fields.push(field_name_str);
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::octopus_core::llm::StructuredOutput for #struct_name #ty_generics #where_clause {
            fn schema_name() -> &'static str {
                #schema_name
            }

            fn schema_description() -> &'static str {
                #description
            }

            fn json_schema() -> ::serde_json::Value {
                let mut properties = ::serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                ::serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }
        }
    })
}

fn get_schema_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("structured") {
            let meta = attr.parse_args::<Meta>()?;
            if let Some(name) = name_value(&meta, "name") {
                return Ok(name);
            }
        }
    }

    Ok(to_snake_case(&input.ident.to_string()))
}

fn get_field_name(field: &Field) -> syn::Result<String> {
    for attr in &field.attrs {
        if attr.path().is_ident("structured") {
            if let Ok(meta) = attr.parse_args::<Meta>() {
                if let Some(name) = name_value(&meta, "rename") {
                    return Ok(name);
                }
            }
        }
    }

    field
        .ident
        .as_ref()
        .map(|ident| ident.to_string())
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))
}

fn name_value(meta: &Meta, key: &str) -> Option<String> {
    let Meta::NameValue(nv) = meta else {
        return None;
    };
    if !nv.path.is_ident(key) {
        return None;
    }
    match &nv.value {
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(s) => Some(s.value()),
            _ => None,
        },
        _ => None,
    }
}

fn is_field_optional(field: &Field) -> bool {
    field.attrs.iter().any(|attr| {
        attr.path().is_ident("structured")
            && matches!(attr.parse_args::<Meta>(), Ok(Meta::Path(path)) if path.is_ident("optional"))
    })
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn first_generic_arg(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let Type::Path(type_path) = ty else {
        return quote! { ::serde_json::json!({}) };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { ::serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { ::serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { ::serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { ::serde_json::json!({"type": "number"}) },
        "bool" => quote! { ::serde_json::json!({"type": "boolean"}) },
        "Option" => match first_generic_arg(segment) {
            Some(inner) => type_to_schema(inner),
            None => quote! { ::serde_json::json!({}) },
        },
        "Vec" | "HashSet" | "BTreeSet" => match first_generic_arg(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    ::serde_json::json!({
                        "type": "array",
                        "items": #inner_schema
                    })
                }
            }
            None => quote! { ::serde_json::json!({"type": "array"}) },
        },
        // Anything else is a nested struct that derives StructuredOutput too.
        _ => quote! {
            <#ty as ::octopus_core::llm::StructuredOutput>::json_schema()
        },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("StateDelta"), "state_delta");
        assert_eq!(to_snake_case("Story"), "story");
    }

    #[test]
    fn test_option_and_vec_detection() {
        let opt: Type = syn::parse_quote!(Option<Vec<String>>);
        let vec: Type = syn::parse_quote!(Vec<String>);
        assert!(is_option_type(&opt));
        assert!(!is_option_type(&vec));
    }

    #[test]
    fn test_nested_type_schema_delegates() {
        let nested: Type = syn::parse_quote!(SetChanges);
        let tokens = type_to_schema(&nested).to_string();
        assert!(tokens.contains("StructuredOutput"));
        assert!(tokens.contains("json_schema"));
    }

    #[test]
    fn test_schema_name_attribute() {
        let input: DeriveInput = syn::parse_quote! {
            /// A delta
            #[structured(name = "record_state_delta")]
            struct StateDelta {
                current_location: Option<String>,
            }
        };
        assert_eq!(get_schema_name(&input).unwrap(), "record_state_delta");
        assert_eq!(get_doc_comment(&input.attrs), "A delta");
    }
}
