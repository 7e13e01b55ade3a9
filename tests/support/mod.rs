pub mod fake_website;
