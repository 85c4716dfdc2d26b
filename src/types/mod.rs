pub mod os_type;
