pub mod crex;
pub mod overs;
pub mod parser;
pub mod provider;

pub use crex::CrexScraper;
pub use parser::TitleParser;
pub use provider::TitleSource;
