mod derive_message;

use proc_macro::TokenStream;
use syn::parse_macro_input;

use crate::derive_message::DeriveMessage;

#[proc_macro_derive(Message, attributes(message_type))]
pub fn message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveMessage);
    TokenStream::from(input.expand())
}
