use crate::dod::{Resource, Storage};
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub script_file_name: String,
}

impl Resource for Script {
    const KIND: &'static str = "Script";
    const CAPACITY: u32 = 256;
    const STORAGE: Storage = Storage::SingleFile("Script.manager.json");

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "scriptFileName",
            Property::new(
                "Script",
                Editor::ScriptSelector,
                PropertyValue::Str(self.script_file_name.clone()),
            ),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.string("scriptFileName", &mut self.script_file_name)
    }
}
