use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, parse_macro_input};

fn make_error(ident: &Ident, msg: &str) -> TokenStream {
    syn::Error::new_spanned(ident, msg)
        .to_compile_error()
        .into()
}

/// Derives `WireSerialize`/`WireDeserialize` for a plain struct by calling
/// each field's own impl in declaration order. Every field type must itself
/// implement both traits (primitives and fixed-size arrays of primitives do,
/// via `wire::numbers`).
#[proc_macro_derive(Wire)]
pub fn derive_wire(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let data_struct = match data {
        Data::Struct(data_struct) => data_struct,
        _ => return make_error(&ident, "Wire can only be derived for structs"),
    };

    let fields = match data_struct.fields {
        Fields::Named(named) => named.named,
        _ => return make_error(&ident, "Wire requires named fields"),
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_names: Vec<&Ident> = fields
        .iter()
        .map(|f| f.ident.as_ref().expect("named field"))
        .collect();

    let ser_body = field_names.iter().map(|name| {
        quote! {
            acc += self.#name.serialize(endianness, &mut target[acc..])?;
        }
    });

    let de_body = field_names.iter().map(|name| {
        quote! {
            let (#name, consumed) = ::wire::WireDeserialize::deserialize(endianness, &input[acc..])?;
            acc += consumed;
        }
    });

    let field_names2 = field_names.clone();

    let expanded = quote! {
        impl #impl_generics ::wire::WireSerialize for #ident #ty_generics #where_clause {
            fn serialize(&self, endianness: ::wire::Endianness, target: &mut [u8]) -> Result<usize, ::wire::WireSerError> {
                let mut acc: usize = 0;
                #(#ser_body)*
                Ok(acc)
            }
        }

        impl #impl_generics ::wire::WireDeserialize for #ident #ty_generics #where_clause {
            fn deserialize(endianness: ::wire::Endianness, input: &[u8]) -> Result<(Self, usize), ::wire::WireDeError> {
                let mut acc: usize = 0;
                #(#de_body)*
                Ok((
                    #ident {
                        #(#field_names2),*
                    },
                    acc,
                ))
            }
        }
    };

    expanded.into()
}
