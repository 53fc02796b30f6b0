//! Run this example with the following command in a terminal:
//!
//! ```console
//! $ cargo run --example rotate_and_verify
//! ```

use jiff::SignedDuration;
use rotating_keyring::{Keychain, MemoryStore, Options};
use rsa::Pkcs1v15Sign;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Small keys and short periods keep the example fast
    let options = Options::default()
        .with_key_size(1024)
        .with_rotation_frequency(SignedDuration::from_mins(5));
    let keychain = Keychain::with_options(MemoryStore::new(), options)?;

    // Sign a digest with the current key
    let signing_key = keychain.signing_key()?;
    let digest = [42u8; 32];
    let signature = signing_key
        .private_key()
        .sign(Pkcs1v15Sign::new_unprefixed(), &digest)?;
    println!("signed with key {}", signing_key.id());

    // Force a new key, the old one stays verifiable
    keychain.rotate()?;
    println!("current key is now {}", keychain.current_key_id());

    let verifier = keychain.get_verifier(signing_key.id())?;
    verifier
        .public_key()
        .verify(Pkcs1v15Sign::new_unprefixed(), &digest, &signature)?;
    println!("signature verified, public key of {}:", verifier.id());
    print!("{}", verifier.to_pem()?);

    for verifier in keychain.list_verifiers()? {
        println!("{} valid until {}", verifier.id(), verifier.expires_at());
    }

    Ok(())
}
