//! Derive macros for the nfig settings library
//!
//! This crate provides `#[derive(SettingsGroup)]` for generating schema
//! bindings from a settings struct.
//!
//! # Usage
//!
//! ```text
//! use nfig::DeriveSettingsGroup as SettingsGroup;
//!
//! #[derive(Default, SettingsGroup)]
//! #[nfig(tier = Tier, data_center = DataCenter)]
//! struct AppSettings {
//!     #[setting(default = 10, description = "Maximum concurrent connections")]
//!     #[default_value(tier = Prod, value = 200)]
//!     connection_limit: i32,
//!
//!     #[setting(group)]
//!     timeouts: Timeouts,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Expr, Fields, LitBool, LitStr, Path, parse_macro_input};

/// Derive macro generating `nfig::SettingsGroup` implementations.
///
/// # Attributes
///
/// ## Container attribute (`#[nfig(...)]`, required)
/// - `tier = TierType` - the tier axis enum
/// - `data_center = DataCenterType` - the data-center axis enum
///
/// ## Field attribute (`#[setting(...)]`)
/// - `name = "Custom.Name"` - override the dotted name segment (default:
///   the field identifier)
/// - `default = expr` - unconditional default (default: the value the
///   struct's `Default` impl gives the field)
/// - `description = "..."` - help text
/// - `converter = expr` - explicit converter (an `Arc<dyn SettingConverter<_>>`)
/// - `encrypted` - mark as encrypted; stored values are ciphertext
/// - `requires_restart` - pure metadata: a change needs an app restart
/// - `group` - the field is a nested settings group
/// - `skip` - exclude the field from the schema
///
/// ## Field attribute (`#[default_value(...)]`, repeatable)
/// - `value = expr` - the default value (ciphertext string for encrypted
///   settings)
/// - `tier = Variant` - tier scope
/// - `data_center = Variant` - data-center scope
/// - `sub_app = 3` - sub-app scope
/// - `allow_overrides = false` - forbid overrides where this default wins
#[proc_macro_derive(SettingsGroup, attributes(nfig, setting, default_value))]
pub fn derive_settings_group(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let container = parse_container_attrs(input)?;
    let tier_ty = &container.tier;
    let dc_ty = &container.data_center;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "SettingsGroup can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "SettingsGroup can only be derived for structs",
            ));
        }
    };

    let mut declarations = Vec::new();
    let mut needs_defaults_instance = false;

    for field in fields {
        let ident = field.ident.as_ref().unwrap();
        let ty = &field.ty;
        let attrs = parse_field_attrs(field)?;

        if attrs.skip {
            continue;
        }

        let setting_name = attrs.name.unwrap_or_else(|| ident.to_string());

        if attrs.group {
            declarations.push(quote! {
                scope.group(
                    #setting_name,
                    |s: &mut Self| &mut s.#ident,
                    |g| <#ty as nfig::SettingsGroup<#tier_ty, #dc_ty>>::bind_group(g),
                );
            });
            continue;
        }

        let mut chain = if attrs.encrypted {
            quote! {
                scope.encrypted_setting(#setting_name, |s: &mut Self, v: #ty| s.#ident = v)
            }
        } else {
            quote! {
                scope.setting(#setting_name, |s: &mut Self, v: #ty| s.#ident = v)
            }
        };

        if let Some(description) = &attrs.description {
            chain = quote! { #chain.description(#description) };
        }
        if let Some(converter) = &attrs.converter {
            chain = quote! { #chain.converter(#converter) };
        }
        if attrs.requires_restart {
            chain = quote! { #chain.requires_restart() };
        }

        if attrs.encrypted {
            if let Some(default) = &attrs.default {
                return Err(syn::Error::new_spanned(
                    default,
                    "encrypted settings cannot declare an unconditional default; \
                     use #[default_value(tier = ..., value = \"<ciphertext>\")]",
                ));
            }
            for dv in &attrs.default_values {
                let value = &dv.value;
                let mut spec = quote! { nfig::CipherDefault::new(#value) };
                spec = scope_default(spec, dv, tier_ty, dc_ty);
                chain = quote! { #chain.cipher_default(#spec) };
            }
        } else {
            let default_expr = match &attrs.default {
                Some(expr) => quote! { ::std::convert::Into::into(#expr) },
                None => {
                    needs_defaults_instance = true;
                    quote! { ::std::clone::Clone::clone(&__defaults.#ident) }
                }
            };
            chain = quote! { #chain.default(#default_expr) };

            for dv in &attrs.default_values {
                let value = &dv.value;
                let mut spec = quote! {
                    nfig::DefaultSpec::new(::std::convert::Into::into(#value))
                };
                spec = scope_default(spec, dv, tier_ty, dc_ty);
                chain = quote! { #chain.with_default(#spec) };
            }
        }

        declarations.push(quote! { #chain; });
    }

    let defaults_instance = needs_defaults_instance.then(|| {
        quote! { let __defaults = <Self as ::std::default::Default>::default(); }
    });

    Ok(quote! {
        impl nfig::SettingsGroup<#tier_ty, #dc_ty> for #name {
            fn bind_group<R: ::std::default::Default + ::std::marker::Send + ::std::marker::Sync + 'static>(
                scope: &mut nfig::schema::Scope<'_, R, Self, #tier_ty, #dc_ty>,
            ) {
                #defaults_instance
                #(#declarations)*
            }
        }
    })
}

fn scope_default(
    mut spec: TokenStream2,
    dv: &DefaultValueAttr,
    tier_ty: &Path,
    dc_ty: &Path,
) -> TokenStream2 {
    if let Some(tier) = &dv.tier {
        let tier = qualify(tier, tier_ty);
        spec = quote! { #spec.tier(#tier) };
    }
    if let Some(dc) = &dv.data_center {
        let dc = qualify(dc, dc_ty);
        spec = quote! { #spec.data_center(#dc) };
    }
    if let Some(sub_app) = &dv.sub_app {
        spec = quote! { #spec.sub_app(#sub_app) };
    }
    if dv.allow_overrides == Some(false) {
        spec = quote! { #spec.no_overrides() };
    }
    spec
}

/// A bare variant name is qualified with the axis type; a longer path is
/// used verbatim.
fn qualify(path: &Path, axis_ty: &Path) -> TokenStream2 {
    if path.segments.len() == 1 {
        quote! { #axis_ty::#path }
    } else {
        quote! { #path }
    }
}

struct ContainerAttrs {
    tier: Path,
    data_center: Path,
}

fn parse_container_attrs(input: &DeriveInput) -> syn::Result<ContainerAttrs> {
    let mut tier = None;
    let mut data_center = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("nfig") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("tier") {
                tier = Some(meta.value()?.parse::<Path>()?);
                Ok(())
            } else if meta.path.is_ident("data_center") {
                data_center = Some(meta.value()?.parse::<Path>()?);
                Ok(())
            } else {
                Err(meta.error("unknown nfig attribute; expected `tier` or `data_center`"))
            }
        })?;
    }

    match (tier, data_center) {
        (Some(tier), Some(data_center)) => Ok(ContainerAttrs { tier, data_center }),
        _ => Err(syn::Error::new_spanned(
            input,
            "missing #[nfig(tier = ..., data_center = ...)] container attribute",
        )),
    }
}

#[derive(Default)]
struct FieldAttrs {
    skip: bool,
    group: bool,
    encrypted: bool,
    requires_restart: bool,
    name: Option<String>,
    description: Option<String>,
    default: Option<Expr>,
    converter: Option<Expr>,
    default_values: Vec<DefaultValueAttr>,
}

struct DefaultValueAttr {
    value: Expr,
    tier: Option<Path>,
    data_center: Option<Path>,
    sub_app: Option<Expr>,
    allow_overrides: Option<bool>,
}

fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();

    for attr in &field.attrs {
        if attr.path().is_ident("setting") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    attrs.skip = true;
                } else if meta.path.is_ident("group") {
                    attrs.group = true;
                } else if meta.path.is_ident("encrypted") {
                    attrs.encrypted = true;
                } else if meta.path.is_ident("requires_restart") {
                    attrs.requires_restart = true;
                } else if meta.path.is_ident("name") {
                    attrs.name = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("description") {
                    attrs.description = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("default") {
                    attrs.default = Some(meta.value()?.parse::<Expr>()?);
                } else if meta.path.is_ident("converter") {
                    attrs.converter = Some(meta.value()?.parse::<Expr>()?);
                } else {
                    return Err(meta.error("unknown setting attribute"));
                }
                Ok(())
            })?;
        } else if attr.path().is_ident("default_value") {
            attrs.default_values.push(parse_default_value(attr)?);
        }
    }

    if attrs.group {
        let conflict = attrs.encrypted
            || attrs.default.is_some()
            || attrs.converter.is_some()
            || !attrs.default_values.is_empty();
        if conflict {
            return Err(syn::Error::new_spanned(
                field,
                "a group field cannot carry value attributes",
            ));
        }
    }

    Ok(attrs)
}

fn parse_default_value(attr: &syn::Attribute) -> syn::Result<DefaultValueAttr> {
    let mut value = None;
    let mut tier = None;
    let mut data_center = None;
    let mut sub_app = None;
    let mut allow_overrides = None;

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("value") {
            value = Some(meta.value()?.parse::<Expr>()?);
        } else if meta.path.is_ident("tier") {
            tier = Some(meta.value()?.parse::<Path>()?);
        } else if meta.path.is_ident("data_center") {
            data_center = Some(meta.value()?.parse::<Path>()?);
        } else if meta.path.is_ident("sub_app") {
            sub_app = Some(meta.value()?.parse::<Expr>()?);
        } else if meta.path.is_ident("allow_overrides") {
            allow_overrides = Some(meta.value()?.parse::<LitBool>()?.value());
        } else {
            return Err(meta.error("unknown default_value attribute"));
        }
        Ok(())
    })?;

    let value = value.ok_or_else(|| {
        syn::Error::new_spanned(attr, "#[default_value(...)] requires `value = ...`")
    })?;

    Ok(DefaultValueAttr {
        value,
        tier,
        data_center,
        sub_app,
        allow_overrides,
    })
}
