use std::fmt;

use crate::carrier::Carrier;

/// 按注册顺序保存的载体原型集合。
///
/// # 教案级说明
/// - **Why**：应答端只能凭 8 字节首部判断对端使用的载体，需要一个有序集合逐个询问
///   [`Carrier::check_header`]；发起端则按名称选择。
/// - **What**：
///   - 选择结果总是原型的 [`Carrier::create`] 副本，原型本身永不参与协商；
///   - 首部匹配按注册顺序进行，先注册者优先；
///   - 同名载体重复注册时后者替换前者，但保留前者的位置。
/// - **注意事项**：注册表在进程启动时构建，之后以共享引用只读使用，无需内部锁。
#[derive(Default)]
pub struct Carriers {
    prototypes: Vec<Box<dyn Carrier>>,
}

impl Carriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prototype: Box<dyn Carrier>) {
        match self
            .prototypes
            .iter_mut()
            .find(|existing| existing.name() == prototype.name())
        {
            Some(slot) => *slot = prototype,
            None => self.prototypes.push(prototype),
        }
    }

    /// 链式注册。
    pub fn with(mut self, prototype: Box<dyn Carrier>) -> Self {
        self.register(prototype);
        self
    }

    pub fn choose_by_name(&self, name: &str) -> Option<Box<dyn Carrier>> {
        self.prototypes
            .iter()
            .find(|carrier| carrier.name() == name)
            .map(|carrier| carrier.create())
    }

    pub fn choose_by_header(&self, header: &[u8]) -> Option<Box<dyn Carrier>> {
        self.prototypes
            .iter()
            .find(|carrier| carrier.check_header(header))
            .map(|carrier| carrier.create())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prototypes.iter().map(|carrier| carrier.name())
    }

    /// 可由发起端主动选用的载体名。
    pub fn offerable(&self) -> impl Iterator<Item = &str> {
        self.prototypes
            .iter()
            .filter(|carrier| carrier.can_offer())
            .map(|carrier| carrier.name())
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

impl fmt::Debug for Carriers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Result,
        connection::ConnectionState,
        header::Header,
    };

    struct Named {
        name: &'static str,
        header: Header,
        offer: bool,
    }

    impl Carrier for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn create(&self) -> Box<dyn Carrier> {
            Box::new(Named {
                name: self.name,
                header: self.header,
                offer: self.offer,
            })
        }

        fn can_offer(&self) -> bool {
            self.offer
        }

        fn check_header(&self, header: &[u8]) -> bool {
            self.header.matches(header)
        }

        fn get_header(&self, buf: &mut [u8]) {
            self.header.write_into(buf)
        }

        fn respond_to_header(&mut self, _: &mut dyn ConnectionState) -> Result<()> {
            Ok(())
        }

        fn expect_reply_to_header(&mut self, _: &mut dyn ConnectionState) -> Result<()> {
            Ok(())
        }
    }

    fn named(name: &'static str, header: &[u8; 8], offer: bool) -> Box<dyn Carrier> {
        Box::new(Named {
            name,
            header: Header::new(*header),
            offer,
        })
    }

    #[test]
    fn first_registered_header_wins() {
        let carriers = Carriers::new()
            .with(named("first", b"SAME_HDR", true))
            .with(named("second", b"SAME_HDR", true));
        let chosen = carriers.choose_by_header(b"SAME_HDR").expect("match");
        assert_eq!(chosen.name(), "first");
        assert!(carriers.choose_by_header(b"SAME_HD").is_none());
    }

    #[test]
    fn offerable_skips_answer_only_carriers() {
        let carriers = Carriers::new()
            .with(named("tcp", b"TCP_STRM", true))
            .with(named("websocket", b"GET /?ws", false));
        assert_eq!(carriers.names().collect::<Vec<_>>(), ["tcp", "websocket"]);
        assert_eq!(carriers.offerable().collect::<Vec<_>>(), ["tcp"]);
        assert!(carriers.choose_by_name("websocket").is_some());
        assert!(carriers.choose_by_name("udp").is_none());
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut carriers = Carriers::new()
            .with(named("a", b"AAAAAAAA", true))
            .with(named("b", b"BBBBBBBB", true));
        carriers.register(named("a", b"aaaaaaaa", true));
        assert_eq!(carriers.len(), 2);
        assert_eq!(carriers.names().collect::<Vec<_>>(), ["a", "b"]);
        assert!(carriers.choose_by_header(b"aaaaaaaa").is_some());
        assert!(carriers.choose_by_header(b"AAAAAAAA").is_none());
    }
}
