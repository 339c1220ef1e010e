use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, parse_macro_input};

/// Runs an `async fn main(handle: Handle)` as the first fiber of a scheduler.
///
/// The generated `main` installs the logger, builds a scheduler from
/// `Config::from_env()`, binds its handle to the declared argument and runs
/// until every fiber is done.
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    // Ensure the function is async
    if input.sig.asyncness.is_none() {
        return quote! { compile_error!("The #[yot_fiber::main] function must be async"); }.into();
    }

    if name != "main" {
        return quote! {
            compile_error!("#[yot_fiber::main] can only be applied to the 'main' function");
        }
        .into();
    }

    let handle = match input.sig.inputs.first() {
        Some(FnArg::Typed(arg)) if input.sig.inputs.len() == 1 => &arg.pat,
        _ => {
            return quote! {
                compile_error!("#[yot_fiber::main] expects exactly one argument: the scheduler handle");
            }
            .into();
        }
    };

    let result = quote! {
        #(#attrs)*
        #vis fn main() {
            ::yot_fiber::init_logging();

            let mut scheduler = ::yot_fiber::Scheduler::with_config(::yot_fiber::Config::from_env())
                .expect("Failed to initialize scheduler");
            let #handle: ::yot_fiber::Handle = scheduler.handle();

            scheduler
                .spawn(async move #body)
                .expect("Failed to spawn main fiber");

            // Returns once no fiber waits on anything.
            scheduler.run().expect("Scheduler failed");
        }
    };
    result.into()
}
