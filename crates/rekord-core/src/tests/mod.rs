mod codec;
mod envelope;
mod index;
mod repo;
