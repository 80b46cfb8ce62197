pub mod multipart_utils;
