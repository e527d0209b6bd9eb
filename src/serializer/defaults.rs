use super::{Reader, ReaderError, Serializer, Writer};

impl Serializer for u8 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u8()
    }
    fn size(&self) -> usize {
        1
    }
}

impl Serializer for bool {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_bool()
    }
    fn size(&self) -> usize {
        1
    }
}

impl Serializer for u16 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u16()
    }
    fn size(&self) -> usize {
        2
    }
}

impl Serializer for u32 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u32()
    }
    fn size(&self) -> usize {
        4
    }
}

impl Serializer for u64 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u64()
    }
    fn size(&self) -> usize {
        8
    }
}

impl Serializer for i64 {
    fn write(&self, writer: &mut Writer) {
        writer.write_i64(*self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_i64()
    }
    fn size(&self) -> usize {
        8
    }
}

impl Serializer for String {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(self);
    }
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_string()
    }
    fn size(&self) -> usize {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        writer.write_compact_size(self.len() as u64);
        bytes.len() + self.len()
    }
}

impl<T: Serializer> Serializer for Option<T> {
    fn write(&self, writer: &mut Writer) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        if reader.read_bool()? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }

    fn size(&self) -> usize {
        1 + self.as_ref().map_or(0, |v| v.size())
    }
}

impl<T: Serializer> Serializer for Vec<T> {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.len() as u64);
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_length()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::read(reader)?);
        }
        Ok(items)
    }

    fn size(&self) -> usize {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        writer.write_compact_size(self.len() as u64);
        bytes.len() + self.iter().map(Serializer::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_round_trip() {
        let some: Option<u64> = Some(42);
        let none: Option<u64> = None;
        assert_eq!(Option::<u64>::from_bytes(&some.to_bytes()).unwrap(), some);
        assert_eq!(Option::<u64>::from_bytes(&none.to_bytes()).unwrap(), none);
    }

    #[test]
    fn vec_round_trip() {
        let values: Vec<i64> = vec![-1, 0, i64::MAX, i64::MIN];
        let decoded = Vec::<i64>::from_bytes(&values.to_bytes()).unwrap();
        assert_eq!(decoded, values);
    }
}
