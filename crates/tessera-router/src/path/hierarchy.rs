/// Lazy iterator over a directory path and its ancestors
///
/// For `/a/b/c`, yields `/a/b/c` → `/a/b` → `/a` → `/`. Used to find the
/// layouts enclosing a route file: each yielded directory may own a
/// `_layout` module.
///
/// # Examples
///
/// ```
/// use tessera_router::path::PathHierarchy;
///
/// let dirs: Vec<&str> = PathHierarchy::new("/blog/posts").collect();
/// assert_eq!(dirs, vec!["/blog/posts", "/blog", "/"]);
/// ```
#[derive(Clone)]
pub struct PathHierarchy<'a> {
    current: Option<&'a str>,
}

impl<'a> PathHierarchy<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            current: Some(path),
        }
    }
}

impl<'a> Iterator for PathHierarchy<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;

        self.current = if current == "/" {
            None
        } else {
            match current.rfind('/') {
                Some(0) => Some("/"),
                Some(slash_pos) => Some(&current[..slash_pos]),
                None => None,
            }
        };

        Some(current)
    }
}
