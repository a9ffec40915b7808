use proc_macro2::TokenStream;
use quote::quote;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::{env, fs};
use walkdir::WalkDir;

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo::rerun-if-changed=tests/data");
    generate_fixture_tests()
}

/// Writes one `test_case` per consent string fixture found in `tests/data`.
fn generate_fixture_tests() -> Result<(), Box<dyn Error>> {
    let test_cases = fixture_test_cases();
    let token_stream = quote! {
        use test_case::test_case;
        #(#test_cases)*
        fn test_fixture(filename: &str) {
            crate::common::Fixture::load_from_file(filename).unwrap().assert_json_matches();
        }
    };
    let syntax_tree = syn::parse2(token_stream)?;
    let pretty = prettyplease::unparse(&syntax_tree);

    let out_dir = env::var("OUT_DIR")?;
    fs::write(Path::new(&out_dir).join("fixture_tests.rs"), pretty)?;

    Ok(())
}

fn fixture_files() -> impl Iterator<Item = PathBuf> {
    WalkDir::new("tests/data")
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json")
        })
        .map(|e| e.into_path())
}

fn fixture_test_cases() -> impl Iterator<Item = TokenStream> {
    fixture_files().filter_map(|path| {
        let name = path.file_stem()?.to_str()?.to_string();
        let path = path.to_str()?.to_string();
        Some(quote! {
            #[test_case(#path ; #name)]
        })
    })
}
