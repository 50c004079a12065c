use quoll::wire::NameList;

bitflags::bitflags! {
    /// The authentication methods of RFC 4252, as a mask; used both for
    /// the methods a server offers and for the set still required by a
    /// multi-step authentication policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Methods: u8 {
        /// The `none` method.
        const NONE = 1 << 0;

        /// The `password` method.
        const PASSWORD = 1 << 1;

        /// The `publickey` method.
        const PUBLICKEY = 1 << 2;
    }
}

impl Methods {
    /// The mask bit for a wire method name.
    pub(crate) fn from_method_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::NONE),
            "password" => Some(Self::PASSWORD),
            "publickey" => Some(Self::PUBLICKEY),
            _ => None,
        }
    }

    /// The `continue_with` name-list: methods that can still productively
    /// be attempted; `none` is never advertised.
    pub(crate) fn names(&self) -> NameList {
        [
            (Self::PUBLICKEY, "publickey"),
            (Self::PASSWORD, "password"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_skip_none() {
        let methods = Methods::NONE | Methods::PASSWORD | Methods::PUBLICKEY;

        assert_eq!(methods.names().to_string(), "publickey,password");
        assert_eq!(Methods::NONE.names(), NameList::default());
    }

    #[test]
    fn name_mapping() {
        assert_eq!(Methods::from_method_name("password"), Some(Methods::PASSWORD));
        assert_eq!(Methods::from_method_name("hostbased"), None);
    }
}
