pub mod invitation;
