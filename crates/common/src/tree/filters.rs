//! Node query filter expressions
//!
//! The remote accepts a boolean expression in the `filters` query parameter.
//! Values are escaped so that names containing query syntax match literally.

const AVAILABLE_FILES_AND_FOLDERS: &str = "kind:(FILE OR FOLDER) AND status:AVAILABLE";

const SPECIAL: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '\'', '"', '~', '*', '?', ':',
    '\\', ' ',
];

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn root() -> String {
    format!("{} AND isRoot:true", AVAILABLE_FILES_AND_FOLDERS)
}

pub fn child(parent_id: &str, name: &str) -> String {
    format!(
        "{} AND parents:{} AND name:{}",
        AVAILABLE_FILES_AND_FOLDERS,
        escape(parent_id),
        escape(name)
    )
}

pub fn children(parent_id: &str) -> String {
    format!(
        "{} AND parents:{}",
        AVAILABLE_FILES_AND_FOLDERS,
        escape(parent_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("my file (1).txt"), "my\\ file\\ \\(1\\).txt");
        assert_eq!(escape("a-b:c"), "a\\-b\\:c");
        assert_eq!(escape("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_child_filter() {
        assert_eq!(
            child("Vq-uiv", "notes.txt"),
            "kind:(FILE OR FOLDER) AND status:AVAILABLE AND parents:Vq\\-uiv AND name:notes.txt"
        );
    }

    #[test]
    fn test_root_filter() {
        assert!(root().ends_with("AND isRoot:true"));
    }
}
