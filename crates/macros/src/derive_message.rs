use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    DeriveInput, Generics, Ident, LitStr,
    parse::{Parse, ParseStream},
};

#[derive(Debug)]
pub struct DeriveMessage {
    ident: Ident,
    generics: Generics,
    message_type: LitStr,
}

impl DeriveMessage {
    pub fn expand(self) -> TokenStream {
        let Self {
            ident,
            generics,
            message_type,
        } = self;
        let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

        quote! {
            #[automatically_derived]
            impl #impl_generics ::keel_sdk::codec::Message for #ident #ty_generics #where_clause {
                fn type_name() -> ::std::borrow::Cow<'static, str> {
                    ::std::borrow::Cow::Borrowed(#message_type)
                }
            }
        }
    }
}

impl Parse for DeriveMessage {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let input: DeriveInput = input.parse()?;

        let message_type = input
            .attrs
            .iter()
            .find_map(|attr| {
                if attr.path().is_ident("message_type") {
                    Some(attr.parse_args::<LitStr>())
                } else {
                    None
                }
            })
            .transpose()?
            .unwrap_or_else(|| LitStr::new(&input.ident.to_string(), input.ident.span()));

        if message_type.value().trim().is_empty() {
            return Err(syn::Error::new(
                message_type.span(),
                "message_type cannot be blank",
            ));
        }

        Ok(DeriveMessage {
            ident: input.ident,
            generics: input.generics,
            message_type,
        })
    }
}
