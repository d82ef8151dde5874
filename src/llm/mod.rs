pub mod client;
pub mod prompt;

/// Text-generation collaborator.
///
/// The repair loop owns nothing about transport or providers; it only
/// issues bounded generation calls and treats the reply as untrusted text.
pub trait Generator {
    fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, String>;
}
