use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, Path, parse_macro_input};

extern crate proc_macro;

/// Turns a plain struct into a gridbench metric sample.
///
/// Derives the serde and `Debug`/`Clone`/`PartialEq` impls a sample needs to travel
/// between threads and processes, and implements the `Metric` marker trait, which
/// must be in scope at the call site.
#[proc_macro_attribute]
pub fn metric(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let input_struct = &ast.ident;
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl Metric for #input_struct {}
    };

    TokenStream::from(expanded)
}

/// Derives the boilerplate for a per-operation accumulator of the metric
/// named in the attribute, e.g. `#[aggregate(Request)]`.
///
/// Besides the serde and `Debug`/`Clone` derives it generates:
/// - `Default`, delegating to `Aggregate::new`;
/// - `Extend<&Metric>`, folding samples in through `Aggregate::consume`.
///
/// The `Aggregate` impl itself is written by hand and the trait must be in
/// scope at the call site. Container-level `#[serde(...)]` attributes on the
/// struct are kept, so an aggregate may pick its own wire form.
#[proc_macro_attribute]
pub fn aggregate(attr: TokenStream, item: TokenStream) -> TokenStream {
    let metric = parse_macro_input!(attr as Path);
    let ast = parse_macro_input!(item as ItemStruct);
    let input_struct = &ast.ident;
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl std::default::Default for #input_struct {
            fn default() -> Self {
                <Self as Aggregate>::new()
            }
        }

        impl<'a> std::iter::Extend<&'a #metric> for #input_struct {
            fn extend<I: std::iter::IntoIterator<Item = &'a #metric>>(&mut self, samples: I) {
                samples.into_iter().for_each(|sample| Aggregate::consume(self, sample));
            }
        }
    };

    TokenStream::from(expanded)
}
