use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only cargo metadata; git metadata isn't available when the crate is built outside of a
    // checkout
    EmitBuilder::builder().all_cargo().emit()?;

    Ok(())
}
