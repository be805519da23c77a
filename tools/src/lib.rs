pub mod args;
pub mod assets;
pub mod cacher;
pub mod meta;
pub mod output;
pub mod packager;
pub mod sandbox;
pub mod scripts;
pub mod tarball;
