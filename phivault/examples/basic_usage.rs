//! Encrypting and searching a patient record.

use phivault::prelude::*;
use phivault_key_file::FileKeyProvider;
use serde_json::json;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("phivault basic usage");
    println!("====================\n");

    let key_dir = PathBuf::from("./example_keys");
    if !key_dir.exists() {
        println!("Initializing key directory at {}...", key_dir.display());
        FileKeyProvider::init(&key_dir)?;
    }

    let provider = FileKeyProvider::new(&key_dir)?;
    println!("Active key: {}\n", provider.keyring().active_key_id());

    let transformer = DocumentTransformer::new(provider, FieldRegistry::clinical_default());

    let record = json!({
        "patient_id": "TEST01",
        "mrn": "12345678",
        "nhs_number": "943 476 5919",
        "date_of_birth": "1980-01-01"
    });
    println!("Plaintext record:\n{}\n", serde_json::to_string_pretty(&record)?);

    let stored = transformer.encrypt_document(&record)?;
    println!("Stored record:\n{}\n", serde_json::to_string_pretty(&stored)?);

    // Lookups go through the digest, never the ciphertext.
    let filter = transformer.create_searchable_query("mrn", " 12345678 ")?;
    println!("Search filter: {filter}");
    assert_eq!(filter["mrn_hash"], stored["mrn_hash"]);
    println!("Filter matches the stored digest\n");

    let restored = transformer.decrypt_document(&stored)?;
    assert_eq!(restored["mrn"], record["mrn"]);
    assert_eq!(restored["nhs_number"], record["nhs_number"]);
    println!("Round trip verified");

    println!("\nNote: key directory at {} can be deleted manually", key_dir.display());
    Ok(())
}
